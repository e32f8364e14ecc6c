use std::net::SocketAddr;

use netbridge_frame::Packet;

/// Decides whether a packet that passed the identity gate is processed.
///
/// Runs on the listen worker for every decoded packet, before any dispatch.
/// Implemented for closures so tests and callers can supply ad-hoc policies.
pub trait PacketValidator: Send + Sync {
    fn accepts(&self, packet: &Packet, from: &SocketAddr) -> bool;
}

/// Accept packets from any address. The server default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl PacketValidator for AcceptAll {
    fn accepts(&self, _packet: &Packet, _from: &SocketAddr) -> bool {
        true
    }
}

/// Accept packets only from one address. The client default, bound to the
/// client's destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FromAddress(pub SocketAddr);

impl PacketValidator for FromAddress {
    fn accepts(&self, _packet: &Packet, from: &SocketAddr) -> bool {
        *from == self.0
    }
}

impl<F> PacketValidator for F
where
    F: Fn(&Packet, &SocketAddr) -> bool + Send + Sync,
{
    fn accepts(&self, packet: &Packet, from: &SocketAddr) -> bool {
        self(packet, from)
    }
}

#[cfg(test)]
mod tests {
    use netbridge_frame::opcode::KEEP_ALIVE;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn from_address_matches_exactly() {
        let packet = Packet::control(KEEP_ALIVE, 0, 0);
        let validator = FromAddress(addr(9000));
        assert!(validator.accepts(&packet, &addr(9000)));
        assert!(!validator.accepts(&packet, &addr(9001)));
        assert!(AcceptAll.accepts(&packet, &addr(1)));
    }

    #[test]
    fn closures_are_validators() {
        let only_even = |p: &Packet, _: &SocketAddr| p.sequence_id % 2 == 0;
        let boxed: Box<dyn PacketValidator> = Box::new(only_even);
        assert!(boxed.accepts(&Packet::control(KEEP_ALIVE, 2, 0), &addr(1)));
        assert!(!boxed.accepts(&Packet::control(KEEP_ALIVE, 3, 0), &addr(1)));
    }
}
