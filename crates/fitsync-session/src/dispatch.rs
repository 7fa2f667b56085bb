//! Routing of raw notifications into session events.
//!
//! The dispatcher runs on whatever thread the link delivers notifications on.
//! It only classifies and enqueues; all session state is owned by the
//! consumer side, which applies events in arrival order.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use fitsync_transport_ble::protocol::{is_end_marker, END_MARKER};
use fitsync_transport_ble::{Characteristic, NotifyHandler};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Bare end marker on the control channel. Only signals readiness.
    ControlMarker,
    /// Any other control payload, untrimmed.
    ControlReply(Vec<u8>),
    DataBurst(Vec<u8>),
    EndOfData,
}

impl Inbound {
    pub fn classify(source: Characteristic, payload: &[u8]) -> Self {
        match (source, is_end_marker(payload)) {
            (Characteristic::Control, true) => Self::ControlMarker,
            (Characteristic::Control, false) => Self::ControlReply(payload.to_vec()),
            (_, true) => Self::EndOfData,
            (_, false) => Self::DataBurst(payload.to_vec()),
        }
    }

    /// The payload as it came off the wire.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::ControlMarker | Self::EndOfData => std::slice::from_ref(&END_MARKER),
            Self::ControlReply(bytes) | Self::DataBurst(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: Sender<Inbound>,
}

impl Dispatcher {
    pub fn channel() -> (Self, Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    /// Classifies and enqueues one notification. Never blocks.
    pub fn dispatch(&self, source: Characteristic, payload: &[u8]) {
        debug!("notify {source}: {}", hex::encode(payload));
        if self.tx.send(Inbound::classify(source, payload)).is_err() {
            trace!("session gone, dropping {source} notification");
        }
    }

    pub fn handler(&self) -> NotifyHandler {
        let dispatcher = self.clone();
        Arc::new(move |source: Characteristic, payload: &[u8]| dispatcher.dispatch(source, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_marker_meaning_depends_on_channel() {
        assert_eq!(
            Inbound::classify(Characteristic::Control, &[0x04]),
            Inbound::ControlMarker
        );
        assert_eq!(
            Inbound::classify(Characteristic::Tx, &[0x04]),
            Inbound::EndOfData
        );
        assert_eq!(
            Inbound::classify(Characteristic::Tx, &[0x04, 0x04]),
            Inbound::DataBurst(vec![0x04, 0x04])
        );
    }

    #[test]
    fn handler_enqueues_in_delivery_order() {
        let (dispatcher, rx) = Dispatcher::channel();
        let handler = dispatcher.handler();
        handler(Characteristic::Tx, &[1, 2, 3]);
        handler(Characteristic::Control, &[9, 9]);
        handler(Characteristic::Tx, &[0x04]);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                Inbound::DataBurst(vec![1, 2, 3]),
                Inbound::ControlReply(vec![9, 9]),
                Inbound::EndOfData,
            ]
        );
        assert_eq!(events[2].payload(), &[0x04]);
    }

    #[test]
    fn concurrent_delivery_from_both_channels_is_lossless() {
        let (dispatcher, rx) = Dispatcher::channel();
        let threads: Vec<_> = [Characteristic::Control, Characteristic::Tx]
            .into_iter()
            .map(|source| {
                let handler = dispatcher.handler();
                std::thread::spawn(move || {
                    for i in 0..500u16 {
                        handler(source, &i.to_be_bytes());
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(rx.try_iter().count(), 1000);
    }

    #[test]
    fn dispatch_after_consumer_dropped_is_silent() {
        let (dispatcher, rx) = Dispatcher::channel();
        drop(rx);
        dispatcher.dispatch(Characteristic::Tx, &[1]);
    }
}
