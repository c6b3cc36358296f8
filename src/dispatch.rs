//! The codec upcall sink: classifies incoming packets, updates the ACK
//! rendezvous state and invokes the application callback.
//!
//! A dispatcher borrows the client state of whichever thread is driving the
//! codec process loop (the receive pump or a request in its ACK wait), so
//! it always runs with the state lock held.

use crate::client::{AckState, PublishStore};
use crate::codec::{EventSink, IncomingPacket};
use crate::message::{DisconnectReason, Event};

pub(crate) struct Dispatcher<'a> {
    pub store: &'a mut PublishStore,
    pub acks: &'a mut AckState,
    pub session_established: &'a mut bool,
    pub callback: &'a (dyn Fn(Event<'_>) + Send + Sync),
}

impl EventSink for Dispatcher<'_> {
    fn on_packet(&mut self, packet: IncomingPacket<'_>) {
        match packet {
            IncomingPacket::Publish(publish) => {
                trace!(
                    "PUBLISH received on topic {} with packet id {}",
                    publish.topic,
                    publish.packet_id
                );
                (self.callback)(Event::PublishReceived(publish));
            }

            IncomingPacket::SubAck { packet_id, codes } => {
                if self.acks.sent_packet_id != packet_id {
                    error!(
                        "SUBACK packet id {} does not match request id {}",
                        packet_id, self.acks.sent_packet_id
                    );
                    return;
                }
                match codes {
                    Ok(codes) if codes.len() == self.acks.num_subs_in_req as usize => {
                        self.acks.sub_codes[..codes.len()].copy_from_slice(codes);
                        self.acks.num_subs_in_req = 0;
                    }
                    Ok(codes) => {
                        error!(
                            "SUBACK carries {} return codes for {} outstanding filters",
                            codes.len(),
                            self.acks.num_subs_in_req
                        );
                        self.acks.suback_mismatch = true;
                        self.acks.num_subs_in_req = 0;
                    }
                    Err(err) => {
                        error!("failed to read SUBACK return codes: {}", err);
                        self.acks.suback_mismatch = true;
                        self.acks.num_subs_in_req = 0;
                    }
                }
            }

            IncomingPacket::UnsubAck { packet_id } => {
                if self.acks.sent_packet_id == packet_id {
                    self.acks.unsub_ack_received = true;
                } else {
                    error!(
                        "UNSUBACK packet id {} does not match request id {}",
                        packet_id, self.acks.sent_packet_id
                    );
                }
            }

            IncomingPacket::PubAck { packet_id, ok } | IncomingPacket::PubRec { packet_id, ok } => {
                debug!("publish acknowledgement received for packet id {}", packet_id);
                if ok {
                    self.acks.pub_ack.acked = packet_id == self.acks.pub_ack.packet_id;
                } else {
                    info!("acknowledgement for packet id {} failed to deserialize", packet_id);
                }
                self.store.clear_packet_id(packet_id);
            }

            IncomingPacket::PingResp { ok } => {
                if ok {
                    trace!("ping response received");
                } else {
                    (self.callback)(Event::Disconnected(DisconnectReason::BrokerDown));
                    *self.session_established = false;
                }
            }

            IncomingPacket::PubRel { packet_id } => {
                trace!("PUBREL received for packet id {}", packet_id);
            }
            IncomingPacket::PubComp { packet_id } => {
                trace!("PUBCOMP received for packet id {}", packet_id);
            }
            IncomingPacket::Disconnect => {
                // User-initiated disconnects notify through their own path.
                debug!("DISCONNECT received from the broker");
            }
            IncomingPacket::Unknown(packet_type) => {
                debug!("ignoring unknown packet type {:#04x}", packet_type);
            }
        }
    }
}
