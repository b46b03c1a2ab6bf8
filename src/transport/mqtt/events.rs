//! Pure routing of rumqttc events and errors onto the transport contract

use crate::transport::{BrokerEvent, ServiceError};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;

/// Map an MQTT event to a broker event; infrastructure traffic maps to `None`
pub fn route_mqtt_event(event: &Event) -> Option<BrokerEvent> {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(_) => Some(BrokerEvent::SessionEstablished),
            Packet::Publish(publish) => Some(BrokerEvent::Message {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.to_vec(),
                retain: publish.retain,
            }),
            Packet::Disconnect(disconnect) => Some(BrokerEvent::SessionLost(format!(
                "Broker disconnected: {:?}",
                disconnect.reason_code
            ))),
            _ => None,
        },
        Event::Outgoing(_) => None,
    }
}

/// Classify an event-loop failure
///
/// Any OS-level I/O error in the source chain is a network failure, whatever
/// its kind. Everything else is a protocol failure.
pub fn classify_error(error: &(dyn std::error::Error + 'static)) -> ServiceError {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return ServiceError::Network(io.to_string());
        }
        current = err.source();
    }

    ServiceError::Protocol(error.to_string())
}
