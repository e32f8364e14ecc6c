use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use netbridge_frame::{Datagram, DatagramQueue};
use netbridge_transport::{Transport, TransportRole};

use crate::cmd::{install_ctrlc_handler, ServeArgs};
use crate::config::CliConfig;
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_datagram, OutputFormat, Origin};

const RECV_TICK: Duration = Duration::from_millis(50);

pub fn run(args: ServeArgs, config: &CliConfig, format: OutputFormat) -> CliResult<i32> {
    let mut transport_config = config.transport.clone();
    transport_config.bind = args.bind;
    let flush_timeout = transport_config.shutdown_timeout;

    let inbound = Arc::new(DatagramQueue::new());
    let mut transport = Transport::start(transport_config, TransportRole::Server, Arc::clone(&inbound))
        .map_err(|err| transport_error("start failed", err))?;
    tracing::info!(local = ?transport.local_addr(), echo = args.echo, "serving");

    let running = install_ctrlc_handler()?;
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) && transport.is_active() {
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
        let Some(datagram) = inbound.pop_timeout(RECV_TICK) else {
            continue;
        };

        print_datagram(&datagram, Origin::Udp, format);
        printed = printed.saturating_add(1);

        if args.echo {
            echo(&transport, datagram);
        }
    }

    if args.echo && !transport.flush(flush_timeout) {
        tracing::warn!(
            unacked = transport.unacked_sequences(),
            "echo replies still unacknowledged at exit"
        );
    }
    transport.shutdown();
    Ok(SUCCESS)
}

fn echo(transport: &Transport, datagram: Datagram) {
    let (op_code, sender_id, payload) = datagram.into_parts();
    tracing::debug!(op = op_code, peer_id = sender_id, size = payload.len(), "echoing datagram");
    if let Err(err) = transport.enqueue_send_to(sender_id, Datagram::new(op_code, 0, payload)) {
        tracing::warn!(peer_id = sender_id, error = %err, "echo dropped");
    }
}
