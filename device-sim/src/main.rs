//! Simulated FarmBot: answers RPC requests on the device's broker topics

mod responder;

use clap::Parser;
use farmbot_shared::{codec, topics, RpcReply};
use responder::{Mode, Responder};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "device-sim", version)]
struct Args {
    #[arg(long, env = "FARMBOT_DEVICE_ID")]
    device_id: String,

    #[arg(long, env = "FARMBOT_TOKEN", hide_env_values = true, default_value = "")]
    token: String,

    #[arg(long, default_value = "localhost")]
    broker: String,

    #[arg(long, default_value_t = 1883)]
    port: u16,

    #[arg(long, value_enum, default_value_t = Mode::Ok)]
    mode: Mode,

    /// Reject this many requests before `--mode` applies
    #[arg(long, default_value_t = 0)]
    fail_first: u32,

    /// Delay before each reply, in milliseconds
    #[arg(long, default_value_t = 0)]
    reply_delay_ms: u64,

    /// Seconds between liveness pings; 0 disables them
    #[arg(long, default_value_t = 30)]
    ping_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let request_topic = topics::from_clients(&args.device_id);
    let reply_topic = topics::from_device(&args.device_id);

    let mut options = MqttOptions::new(
        format!("device-sim-{}", args.device_id),
        &args.broker,
        args.port,
    );
    options.set_keep_alive(Duration::from_secs(60));
    options.set_credentials(&args.device_id, &args.token);
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    let mut responder = Responder::new(args.mode, args.fail_first);
    let reply_delay = Duration::from_millis(args.reply_delay_ms);

    if args.ping_secs > 0 {
        tokio::spawn(ping_loop(
            client.clone(),
            reply_topic.clone(),
            Duration::from_secs(args.ping_secs),
        ));
    }

    info!(
        "Simulating {} on {}:{} (mode={:?})",
        args.device_id, args.broker, args.port, args.mode
    );

    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if subscribe_requests(&client, &request_topic) {
                        info!("Connected; listening on {}", request_topic);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let request = match codec::decode_request(&publish.payload) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!("Dropping malformed request on {}: {}", publish.topic, e);
                            continue;
                        }
                    };
                    let names: Vec<&str> = request.body.iter().map(|c| c.name()).collect();
                    info!("[{}] {:?}", request.label(), names);

                    match responder.reply_for(&request) {
                        Some(reply) => {
                            tokio::spawn(send_reply(client.clone(), reply_topic.clone(), reply, reply_delay));
                        }
                        None => debug!("[{}] staying silent", request.label()),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down after {} requests", responder.handled());
                client.disconnect().await?;
                break;
            }
        }
    }

    Ok(())
}

/// Queue the request subscription without waiting.
///
/// Runs on the task that polls the event loop, which is the only thing
/// draining the request queue.
fn subscribe_requests(client: &AsyncClient, topic: &str) -> bool {
    match client.try_subscribe(topic, QoS::AtMostOnce) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to subscribe to {}: {}", topic, e);
            false
        }
    }
}

async fn send_reply(client: AsyncClient, topic: String, reply: RpcReply, delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let payload = match codec::encode_reply(&reply) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to encode reply: {}", e);
            return;
        }
    };
    if let Err(e) = client.publish_bytes(topic, QoS::AtMostOnce, false, payload).await {
        warn!("Failed to publish reply: {}", e);
    }
}

async fn ping_loop(client: AsyncClient, topic: String, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        send_reply(client.clone(), topic.clone(), RpcReply::ping(), Duration::ZERO).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_with_full_queue_returns() {
        let options = MqttOptions::new("device-sim-test", "localhost", 1883);
        let (client, _eventloop) = AsyncClient::new(options, 1);

        // Nothing polls the event loop, so the queue stays full
        while client
            .try_publish("bot/d/from_device", QoS::AtMostOnce, false, "{}")
            .is_ok()
        {}

        assert!(!subscribe_requests(&client, "bot/d/from_clients"));
    }
}
