use std::sync::Arc;
use std::time::{Duration, Instant};

use netbridge_frame::{Datagram, DatagramQueue};
use netbridge_transport::{ConnectionState, Transport, TransportRole};

use crate::cmd::SendArgs;
use crate::config::CliConfig;
use crate::exit::{transport_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_datagram, OutputFormat, Origin};

const RECV_TICK: Duration = Duration::from_millis(20);

pub fn run(args: SendArgs, config: &CliConfig, format: OutputFormat) -> CliResult<i32> {
    let payload = args.payload.resolve()?;

    let inbound = Arc::new(DatagramQueue::new());
    let mut transport = Transport::start(
        config.transport.clone(),
        TransportRole::Client {
            destination: args.destination,
        },
        Arc::clone(&inbound),
    )
    .map_err(|err| transport_error("start failed", err))?;

    if !transport.wait_connected(args.timeout) {
        return Err(CliError::new(
            TIMEOUT,
            format!(
                "no connection to {} within {:?}",
                args.destination, args.timeout
            ),
        ));
    }
    tracing::debug!(
        peer_id = ?transport.local_peer_id(),
        server = %args.destination,
        "connected"
    );

    transport
        .enqueue_send(Datagram::new(args.op, 0, payload))
        .map_err(|err| transport_error("send failed", err))?;
    if !transport.flush(args.timeout) {
        return Err(CliError::new(
            TIMEOUT,
            format!("datagram not acknowledged within {:?}", args.timeout),
        ));
    }

    if args.wait {
        let reply = wait_for_reply(&transport, &inbound, args.wait_timeout)?;
        print_datagram(&reply, Origin::Udp, format);
    }

    transport.shutdown();
    Ok(SUCCESS)
}

fn wait_for_reply(
    transport: &Transport,
    inbound: &DatagramQueue<Datagram>,
    timeout: Duration,
) -> CliResult<Datagram> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(datagram) = inbound.pop_timeout(RECV_TICK) {
            return Ok(datagram);
        }
        if transport.state() == ConnectionState::Closed {
            return Err(CliError::new(FAILURE, "server closed the connection"));
        }
    }
    inbound
        .try_pop()
        .ok_or_else(|| CliError::new(TIMEOUT, format!("no reply within {timeout:?}")))
}
