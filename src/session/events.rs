//! Pure routing of broker events
//!
//! Keeps the event-loop task free of protocol inspection: every rumqttc event
//! maps onto one [`EventRoute`] the loop can act on.

use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::Event;

/// Routing decision for a single broker event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// ConnAck with a success code
    ConnectionAccepted,
    /// ConnAck with a refusal code, carried as text
    ConnectionRefused(String),
    /// Broker-initiated disconnect
    Disconnected,
    /// Inbound publish on a subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// SubAck for an earlier subscribe request
    SubscriptionConfirmed { packet_id: u16 },
    /// Any other incoming packet, kept only for debug logging
    Infrastructure(String),
    /// Outgoing packets need no handling
    Outgoing,
}

/// Map a rumqttc event onto a routing decision
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(packet) => match packet {
            Packet::ConnAck(ack) => {
                if ack.code == ConnectReturnCode::Success {
                    EventRoute::ConnectionAccepted
                } else {
                    EventRoute::ConnectionRefused(format!("{:?}", ack.code))
                }
            }
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                payload: publish.payload.to_vec(),
                retain: publish.retain,
            },
            Packet::Disconnect(_) => EventRoute::Disconnected,
            Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                packet_id: suback.pkid,
            },
            other => EventRoute::Infrastructure(format!("{other:?}")),
        },
        Event::Outgoing(_) => EventRoute::Outgoing,
    }
}

/// Decode a message payload as text; invalid byte sequences are replaced,
/// never rejected
pub fn decode_payload(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_payload_valid_utf8() {
        assert_eq!(decode_payload(b"21.5"), "21.5");
        assert_eq!(decode_payload("héllo".as_bytes()), "héllo");
    }

    #[test]
    fn decode_payload_replaces_invalid_bytes() {
        let decoded = decode_payload(&[0x66, 0x6f, 0xff, 0x6f]);
        assert_eq!(decoded, "fo\u{fffd}o");
    }

    #[test]
    fn decode_payload_empty() {
        assert_eq!(decode_payload(b""), "");
    }
}
