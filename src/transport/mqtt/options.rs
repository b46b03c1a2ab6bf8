//! Pure MQTT option construction

use crate::config::BrokerSection;
use crate::transport::{ClientError, SessionOptions};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use url::Url;

/// Frames are small; keep the broker-side limit tight
const MAX_PACKET_SIZE: u32 = 16 * 1024;

/// Broker host and port from the configured URL
pub fn broker_address(broker_url: &str) -> Result<(String, u16, bool), ClientError> {
    let url = Url::parse(broker_url)
        .map_err(|_| ClientError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" => false,
        "mqtts" => true,
        _ => return Err(ClientError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| ClientError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}

/// Build client options for one session
///
/// The last will is the session's GOODBYE frame, so the broker announces the
/// device's departure when the connection drops without a clean disconnect.
pub fn configure_mqtt_options(
    broker: &BrokerSection,
    session: &SessionOptions,
) -> Result<MqttOptions, ClientError> {
    let (host, port, tls) = broker_address(&broker.url)?;
    let mut mqtt_options = MqttOptions::new(session.client_id.clone(), host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username_env) = &broker.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = broker
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(&username, &password);
        }
    }

    mqtt_options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs));
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    if let Some(payload) = &session.last_will {
        let will = LastWill::new(&session.topic, payload.clone(), QoS::AtMostOnce, false, None);
        mqtt_options.set_last_will(will);
    }

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(url: &str) -> BrokerSection {
        BrokerSection {
            url: url.to_string(),
            username_env: None,
            password_env: None,
            keep_alive_secs: 15,
        }
    }

    fn session() -> SessionOptions {
        SessionOptions {
            client_id: "pod-1".to_string(),
            topic: "pod-1".to_string(),
            last_will: Some("!1:,:1".to_string()),
        }
    }

    #[test]
    fn test_broker_address_defaults() {
        assert_eq!(
            broker_address("mqtt://localhost").unwrap(),
            ("localhost".to_string(), 1883, false)
        );
        assert_eq!(
            broker_address("mqtts://broker.example.com").unwrap(),
            ("broker.example.com".to_string(), 8883, true)
        );
        assert_eq!(
            broker_address("mqtt://10.0.0.2:1884").unwrap(),
            ("10.0.0.2".to_string(), 1884, false)
        );
    }

    #[test]
    fn test_broker_address_rejects_other_schemes() {
        assert!(matches!(
            broker_address("http://localhost"),
            Err(ClientError::InvalidBrokerUrl(_))
        ));
        assert!(broker_address("localhost:1883").is_err());
    }

    #[test]
    fn test_options_carry_session_identity() {
        let broker = broker("mqtt://localhost:1883");
        let options = configure_mqtt_options(&broker, &session()).unwrap();
        assert_eq!(options.client_id(), "pod-1");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert!(options.last_will().is_some());
    }

    #[test]
    fn test_options_without_last_will() {
        let session = SessionOptions {
            last_will: None,
            ..session()
        };
        let options = configure_mqtt_options(&broker("mqtt://localhost"), &session).unwrap();
        assert!(options.last_will().is_none());
    }
}
