use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use netbridge_frame::{Datagram, DatagramQueue, Signal};
use netbridge_relay::{ProcessRelay, RelayConfig, RelayError, RelayRole};
use netbridge_transport::{Transport, TransportError, TransportRole};

use crate::cmd::{install_ctrlc_handler, RelayArgs};
use crate::config::CliConfig;
use crate::exit::{relay_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_datagram, OutputFormat, Origin};

/// How often an incomplete pair is retried.
const PAIR_RETRY: Duration = Duration::from_millis(200);

const RECV_TICK: Duration = Duration::from_millis(20);

pub fn run(args: RelayArgs, config: &CliConfig, format: OutputFormat) -> CliResult<i32> {
    if args.bridge.is_some() && args.role != RelayRole::Primary {
        return Err(CliError::new(USAGE, "--bridge is only valid for the primary"));
    }

    let relay_config = RelayConfig {
        base_name: args.name.clone(),
        dir: args.dir.clone().unwrap_or_else(|| config.relay.dir.clone()),
        ..config.relay.clone()
    };
    let mut outgoing = if args.payload.is_set() {
        Some(Datagram::new(args.op, args.sender, args.payload.resolve()?))
    } else {
        None
    };

    let relay_inbound = Arc::new(DatagramQueue::new());
    let signal = Arc::new(Signal::new());
    let mut relay = ProcessRelay::start_with_signal(
        relay_config,
        args.role,
        Arc::clone(&relay_inbound),
        Arc::clone(&signal),
    )
    .map_err(|err| relay_error("relay start failed", err))?;

    let mut bridge = match args.bridge {
        Some(bind) => Some(Bridge::start(bind, config)?),
        None => None,
    };

    let running = install_ctrlc_handler()?;
    let mut printed = 0usize;
    let mut last_pair_attempt: Option<Instant> = None;
    let mut was_paired = false;

    while running.load(Ordering::SeqCst) && relay.is_active() {
        if !relay.is_paired() {
            if was_paired {
                tracing::warn!(role = %args.role, "relay peer lost; re-pairing");
                was_paired = false;
            }
            if last_pair_attempt.is_none_or(|at| at.elapsed() >= PAIR_RETRY) {
                last_pair_attempt = Some(Instant::now());
                was_paired = relay
                    .complete_pair()
                    .map_err(|err| relay_error("pairing failed", err))?;
            }
        }

        if was_paired && send_pending(&relay, &mut outgoing)? {
            tracing::info!(role = %args.role, op = args.op, "datagram sent to relay peer");
        }

        if outgoing.is_none() && args.count.is_some_and(|count| printed >= count) {
            break;
        }

        if relay_inbound.is_empty() {
            signal.wait_timeout(RECV_TICK);
        }
        for datagram in relay_inbound.drain() {
            match &bridge {
                Some(bridge) => bridge.to_network(datagram),
                None => {
                    print_datagram(&datagram, Origin::Relay, format);
                    printed = printed.saturating_add(1);
                }
            }
        }

        if let Some(bridge) = &bridge {
            for datagram in bridge.inbound.drain() {
                if let Err(err) = relay.add_datagram(datagram) {
                    tracing::warn!(error = %err, "datagram from network not relayed");
                }
            }
        }
    }

    if let Some(bridge) = bridge.as_mut() {
        bridge.transport.shutdown();
    }
    relay.shutdown();
    Ok(SUCCESS)
}

/// Write the pending datagram, if any. When the peer has gone away the
/// datagram stays pending and the re-pair loop gets another go at it.
fn send_pending(relay: &ProcessRelay, outgoing: &mut Option<Datagram>) -> CliResult<bool> {
    let Some(datagram) = outgoing.take() else {
        return Ok(false);
    };
    let kept = Datagram::new(
        datagram.op_code(),
        datagram.sender_id(),
        datagram.payload().clone(),
    );
    match relay.add_datagram(datagram) {
        Ok(()) => Ok(true),
        Err(err @ (RelayError::Socket(_) | RelayError::NotPaired)) => {
            tracing::warn!(role = %relay.role(), error = %err, "relay send failed; retrying after re-pair");
            *outgoing = Some(kept);
            Ok(false)
        }
        Err(err) => Err(relay_error("relay send failed", err)),
    }
}

/// A server transport whose peers exchange datagrams with the relay peer.
struct Bridge {
    transport: Transport,
    inbound: Arc<DatagramQueue<Datagram>>,
}

impl Bridge {
    fn start(bind: std::net::SocketAddr, config: &CliConfig) -> CliResult<Self> {
        let mut transport_config = config.transport.clone();
        transport_config.bind = bind;
        let inbound = Arc::new(DatagramQueue::new());
        let transport =
            Transport::start(transport_config, TransportRole::Server, Arc::clone(&inbound))
                .map_err(|err| transport_error("bridge start failed", err))?;
        tracing::info!(local = ?transport.local_addr(), "bridging relay to network");
        Ok(Self { transport, inbound })
    }

    /// Route a relay datagram to the peer its sender id names, or to every
    /// peer when no such peer is connected.
    fn to_network(&self, datagram: Datagram) {
        let sender_id = datagram.sender_id();
        let result = if self.transport.peers().iter().any(|(id, _)| *id == sender_id) {
            self.transport.enqueue_send_to(sender_id, datagram)
        } else {
            self.transport.enqueue_send(datagram)
        };
        match result {
            Ok(()) => {}
            Err(TransportError::NotActive) => {
                tracing::warn!("bridge transport stopped; datagram dropped");
            }
            Err(err) => tracing::warn!(error = %err, "datagram not forwarded to network"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use netbridge_frame::MAX_RELAY_PAYLOAD;

    use super::*;
    use crate::exit::DATA_INVALID;

    struct Dir(PathBuf);

    impl Drop for Dir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn make_dir(tag: &str) -> Dir {
        let dir = PathBuf::from(format!(
            "/tmp/nbc-{}-{}-{}",
            tag,
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        Dir(dir)
    }

    fn start(dir: &Dir, role: RelayRole) -> (ProcessRelay, Arc<DatagramQueue<Datagram>>) {
        let config = RelayConfig {
            dir: dir.0.clone(),
            base_name: "cli".to_string(),
            poll_timeout: Duration::from_millis(10),
            keepalive_interval: None,
            peer_timeout: None,
            shutdown_timeout: Duration::from_secs(2),
            ..RelayConfig::default()
        };
        let inbound = Arc::new(DatagramQueue::new());
        let relay = ProcessRelay::start(config, role, Arc::clone(&inbound)).expect("relay should start");
        (relay, inbound)
    }

    #[test]
    fn failed_write_keeps_datagram_pending() {
        let dir = make_dir("keep");
        let (mut primary, _primary_inbound) = start(&dir, RelayRole::Primary);
        let (mut secondary, secondary_inbound) = start(&dir, RelayRole::Secondary);
        assert!(!secondary.complete_pair().expect("secondary bind"));
        assert!(primary.complete_pair().expect("primary pair"));

        secondary.shutdown();
        let mut outgoing = Some(Datagram::new(42, 7, vec![1, 2, 3]));
        let sent = send_pending(&primary, &mut outgoing).expect("a vanished peer is not fatal");
        assert!(!sent);
        let kept = outgoing.as_ref().expect("datagram should stay pending");
        assert_eq!((kept.op_code(), kept.sender_id()), (42, 7));
        assert_eq!(kept.payload().as_ref(), &[1, 2, 3]);
        assert!(!primary.is_paired());

        // A fresh Secondary under the same names lets the retry through.
        drop(secondary_inbound);
        let (mut secondary, secondary_inbound) = start(&dir, RelayRole::Secondary);
        secondary.complete_pair().expect("secondary bind");
        assert!(primary.complete_pair().expect("primary re-pair"));
        assert!(send_pending(&primary, &mut outgoing).expect("send after re-pair"));
        assert!(outgoing.is_none());

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut delivered = None;
        while delivered.is_none() && Instant::now() < deadline {
            delivered = secondary_inbound
                .pop_timeout(Duration::from_millis(20))
                .filter(|datagram| datagram.op_code() == 42);
        }
        let delivered = delivered.expect("secondary should receive the retried datagram");
        assert_eq!(delivered.payload().as_ref(), &[1, 2, 3]);

        secondary.shutdown();
        primary.shutdown();
    }

    #[test]
    fn unpaired_relay_keeps_datagram_pending() {
        let dir = make_dir("unpaired");
        let (mut primary, _inbound) = start(&dir, RelayRole::Primary);
        let mut outgoing = Some(Datagram::new(1, 0, vec![9]));
        assert!(!send_pending(&primary, &mut outgoing).expect("not paired is not fatal"));
        assert!(outgoing.is_some());
        primary.shutdown();
    }

    #[test]
    fn oversized_datagram_is_fatal() {
        let dir = make_dir("oversize");
        let (mut primary, _inbound) = start(&dir, RelayRole::Primary);
        let mut outgoing = Some(Datagram::new(1, 0, vec![0u8; MAX_RELAY_PAYLOAD + 1]));
        let err = send_pending(&primary, &mut outgoing).expect_err("oversized datagram cannot be sent");
        assert_eq!(err.code, DATA_INVALID);
        assert!(outgoing.is_none());
        primary.shutdown();
    }

    #[test]
    fn nothing_pending_sends_nothing() {
        let dir = make_dir("idle");
        let (mut primary, _inbound) = start(&dir, RelayRole::Primary);
        let mut outgoing = None;
        assert!(!send_pending(&primary, &mut outgoing).expect("nothing to send"));
        primary.shutdown();
    }
}
