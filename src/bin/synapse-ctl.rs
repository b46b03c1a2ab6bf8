//! SynapseLink controller tool
//!
//! Publishes one command frame to a device topic and prints the frames that
//! come back on that topic until the wait window closes.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use synapselink::config::{BrokerSection, LinkConfig};
use synapselink::observability::init_default_logging;
use synapselink::protocol::{
    decode, device_topic, encode_peer, CommandCode, EchoPolicy, Frame, Origin,
};
use synapselink::transport::{BrokerEvent, PubSubClient, SessionOptions};
use synapselink::{LinkError, LinkResult, MqttClient};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Send a command to a SynapseLink device
#[derive(Parser)]
#[command(name = "synapse-ctl")]
#[command(about = "Send a command to a SynapseLink device and print its replies")]
#[command(version)]
struct Args {
    /// Configuration file; supplies broker settings and the default device
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL, used when no configuration file is given
    #[arg(long, default_value = "mqtt://localhost:1883")]
    broker: String,

    /// Target device id
    #[arg(short, long)]
    device: Option<String>,

    /// Event id carried by the outgoing frame
    #[arg(long, default_value_t = 1)]
    event_id: u64,

    /// How long to collect replies, in milliseconds
    #[arg(long, default_value_t = 3000)]
    wait_ms: u64,

    /// Command name (e.g. DIGITAL_WRITE) or numeric code
    command: String,

    /// Command parameters
    params: Vec<String>,
}

const RESET: &str = "\x1b[0m";
const ACK_COLOR: &str = "\x1b[1;32m";
const REPLY_COLOR: &str = "\x1b[1;36m";
const SELF_COLOR: &str = "\x1b[0;37m";

#[tokio::main]
async fn main() {
    init_default_logging();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("synapse-ctl failed: {}", e);
        process::exit(1);
    }
}

fn parse_command(input: &str) -> LinkResult<CommandCode> {
    if let Ok(value) = input.parse::<u16>() {
        return Ok(CommandCode::from(value));
    }
    CommandCode::from_name(input)
        .ok_or_else(|| LinkError::invalid_input(format!("Unknown command: {input}")))
}

fn resolve_target(args: &Args) -> LinkResult<(BrokerSection, String)> {
    let config = args
        .config
        .as_deref()
        .map(LinkConfig::load_from_file)
        .transpose()?;

    let broker = match &config {
        Some(config) => config.broker.clone(),
        None => BrokerSection {
            url: args.broker.clone(),
            username_env: None,
            password_env: None,
            keep_alive_secs: 15,
        },
    };

    let device = args
        .device
        .clone()
        .or_else(|| config.map(|c| c.device.id))
        .ok_or_else(|| LinkError::invalid_input("No device given; use --device or --config"))?;

    Ok((broker, device))
}

fn render(frame: &Frame) -> String {
    let color = match (frame.origin, frame.command) {
        (Origin::Peer, _) => SELF_COLOR,
        (Origin::SelfOrigin, CommandCode::ACKNOWLEDGE) => ACK_COLOR,
        (Origin::SelfOrigin, _) => REPLY_COLOR,
    };
    format!(
        "{color}{:<16}{RESET} id={:<6} params=[{}]",
        frame.command.to_string(),
        frame.event_id,
        frame.parameters.join(", ")
    )
}

async fn run(args: Args) -> LinkResult<()> {
    let command = parse_command(&args.command)?;
    let (broker, device) = resolve_target(&args)?;
    let topic = device_topic(&device)?;
    let outgoing = encode_peer(command, &args.params, args.event_id)?;

    let session = SessionOptions {
        client_id: format!("synapse-ctl-{}-{}", device, process::id()),
        topic: topic.clone(),
        last_will: None,
    };
    let mut client = MqttClient::new(&broker, &session)?;

    client.handshake(Duration::from_secs(5)).await?;
    client.subscribe(&topic).await?;
    client.publish(&topic, &outgoing).await?;
    info!(topic = %topic, frame = %outgoing, "Command sent");

    let deadline = Instant::now() + Duration::from_millis(args.wait_ms);
    let mut sent_seen = false;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let events = match client.next_events(remaining).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Broker connection error: {}", e);
                break;
            }
        };

        for event in events {
            let BrokerEvent::Message {
                topic: message_topic,
                payload,
                retain,
            } = event
            else {
                continue;
            };
            if retain || message_topic != topic {
                continue;
            }

            let text = String::from_utf8_lossy(&payload);
            if !sent_seen && text == outgoing {
                // Our own publish coming back
                sent_seen = true;
                continue;
            }

            match decode(&text, EchoPolicy::Accept) {
                Ok(frame) => println!("{}", render(&frame)),
                Err(e) => debug!("Skipping undecodable payload {:?}: {}", text, e),
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_by_name_and_number() {
        assert_eq!(
            parse_command("DIGITAL_WRITE").unwrap(),
            CommandCode::DIGITAL_WRITE
        );
        assert_eq!(parse_command("5").unwrap(), CommandCode::REBOOT);
        assert_eq!(parse_command("300").unwrap(), CommandCode::from(300));
        assert!(parse_command("SELF_DESTRUCT").is_err());
    }

    #[test]
    fn test_resolve_target_without_config() {
        let args = Args::parse_from(["synapse-ctl", "--device", "synapsepod-crystal", "HEARTBEAT"]);
        let (broker, device) = resolve_target(&args).unwrap();
        assert_eq!(broker.url, "mqtt://localhost:1883");
        assert_eq!(device, "synapsepod-crystal");

        let args = Args::parse_from(["synapse-ctl", "HEARTBEAT"]);
        assert!(resolve_target(&args).is_err());
    }
}
