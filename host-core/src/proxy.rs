//! The peer-side stub.
//!
//! Every outbound action gets wrapped into a [`HostBound`] addressed to the host identity and put on
//! the peer link. A failing send is logged and the action is dropped, the user notices through the
//! missing broadcast. Retrying is up to the transport.

use crate::admission::hash_password;
use crate::channel::PeerLink;
use crate::error::TransportError;
use crate::traits::SerializationCap;
use crate::wire;
use protocol::{HostBound, HostRequest};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

pub struct HostProxy<E> {
    link: Arc<dyn PeerLink>,
    host_id: String,
    _event: PhantomData<fn() -> E>,
}

impl<E> Clone for HostProxy<E> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
            host_id: self.host_id.clone(),
            _event: PhantomData,
        }
    }
}

impl<E: SerializationCap + Send + 'static> HostProxy<E> {
    /// `host_id` is taken from the session announcement.
    pub fn new(link: Arc<dyn PeerLink>, host_id: impl Into<String>) -> Self {
        Self {
            link,
            host_id: host_id.into(),
            _event: PhantomData,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    fn try_send(&self, request: HostRequest<E>) -> Result<(), TransportError> {
        let bound = HostBound {
            host_id: self.host_id.clone(),
            request,
        };
        let body = wire::encode(&bound).map_err(|e| TransportError::Send(e.to_string()))?;
        self.link.send_to_host(body)
    }

    /// Sends and forgets. Returns whether the request made it onto the link.
    pub fn send(&self, request: HostRequest<E>) -> bool {
        match self.try_send(request) {
            Ok(()) => true,
            Err(error) => {
                warn!(host_id = %self.host_id, %error, "Dropping request to host");
                false
            }
        }
    }

    /// The password is hashed here, the plain text never leaves the peer.
    pub fn join(&self, name: &str, password: Option<&str>) -> bool {
        self.send(HostRequest::PlayerJoined {
            name: name.to_string(),
            password_hash: password.map(hash_password),
        })
    }

    pub fn rejoin(&self, name: &str, password: Option<&str>) -> bool {
        self.send(HostRequest::PlayerRejoined {
            name: name.to_string(),
            password_hash: password.map(hash_password),
        })
    }

    pub fn observe(&self, name: &str) -> bool {
        self.send(HostRequest::ObserverJoined {
            name: name.to_string(),
        })
    }

    pub fn reobserve(&self, name: &str) -> bool {
        self.send(HostRequest::ObserverRejoined {
            name: name.to_string(),
        })
    }

    pub fn send_event(&self, event: E) -> bool {
        self.send(HostRequest::Event(event))
    }

    pub fn send_chat(&self, body: impl Into<String>) -> bool {
        self.send(HostRequest::ChatMessage { body: body.into() })
    }

    pub fn send_heartbeat(&self, name: &str) -> bool {
        self.send(HostRequest::Heartbeat {
            name: name.to_string(),
        })
    }

    pub fn send_media(&self, payload: Vec<u8>) -> bool {
        self.send(HostRequest::Media { payload })
    }

    pub fn request_snapshot(&self) -> bool {
        self.send(HostRequest::RequestSnapshot)
    }

    /// Sends a heartbeat for `name` right away and then every `period` until stopped.
    pub fn spawn_heartbeat_loop(&self, name: &str, period: Duration) -> HeartbeatLoop {
        let proxy = self.clone();
        let name = name.to_string();
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stopped.changed() => break,
                }
                proxy.send_heartbeat(&name);
            }
            debug!(name = %name, "Heartbeat loop finished");
        });
        HeartbeatLoop { stop, task }
    }
}

/// Handle of a running heartbeat loop.
pub struct HeartbeatLoop {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatLoop {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelEvent, HostLink};
    use crate::memory_channel::MemoryHub;

    fn decode(event: Option<ChannelEvent>) -> HostBound<u32> {
        match event {
            Some(ChannelEvent::Request(_, body)) => wire::decode(&body).unwrap(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn actions_are_addressed_to_the_host() {
        let hub = MemoryHub::new();
        let (_host, mut inbound) = hub.open_host("room").unwrap();
        let (link, _events) = hub.connect_peer("room").unwrap();
        inbound.recv().await;

        let proxy: HostProxy<u32> = HostProxy::new(Arc::new(link), "host-1");
        assert!(proxy.join("Alice", Some("abc")));
        assert!(proxy.send_event(42));

        let joined = decode(inbound.recv().await);
        assert_eq!(joined.host_id, "host-1");
        assert_eq!(
            joined.request,
            HostRequest::PlayerJoined {
                name: "Alice".to_string(),
                password_hash: Some(hash_password("abc")),
            }
        );
        assert_eq!(decode(inbound.recv().await).request, HostRequest::Event(42));
    }

    #[tokio::test]
    async fn send_failure_is_swallowed() {
        let hub = MemoryHub::new();
        let (host, _inbound) = hub.open_host("room").unwrap();
        let (link, _events) = hub.connect_peer("room").unwrap();
        let proxy: HostProxy<u32> = HostProxy::new(Arc::new(link.clone()), "host-1");

        link.disconnect();
        assert!(!proxy.send_chat("anyone there?"));
        host.close();
        assert!(!proxy.send_heartbeat("Alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_loop_runs_until_stopped() {
        let hub = MemoryHub::new();
        let (_host, mut inbound) = hub.open_host("room").unwrap();
        let (link, _events) = hub.connect_peer("room").unwrap();
        inbound.recv().await;

        let proxy: HostProxy<u32> = HostProxy::new(Arc::new(link), "host-1");
        let heartbeats = proxy.spawn_heartbeat_loop("Alice", Duration::from_secs(3));
        // Ticks at 0, 3, 6 and 9.
        tokio::time::sleep(Duration::from_secs(10)).await;
        heartbeats.stop().await;

        let mut count = 0;
        while let Ok(event) = inbound.try_recv() {
            let bound = decode(Some(event));
            assert_eq!(
                bound.request,
                HostRequest::Heartbeat {
                    name: "Alice".to_string()
                }
            );
            count += 1;
        }
        assert_eq!(count, 4);
    }
}
