use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use xauthority::AuthorityRecord;

/// What kind of session a seat was asked to create a display server for.
/// The XDMCP wire protocol itself (negotiating this from a `Query`/`Request`
/// packet) is out of scope here; this core only reacts to the already-parsed
/// result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    X,
    Other,
}

/// An inbound XDMCP session request, already authenticated and authorised by
/// the wire-protocol layer this crate doesn't implement.
pub struct XdmcpSession {
    pub kind: SessionKind,
    pub authority: AuthorityRecord,
    pub peer_address: std::net::SocketAddr,
    pub display_number: u32,
}

/// A display server reachable over the network, bound to one XDMCP peer for
/// its lifetime. Session-establishment itself belongs to the wire-protocol
/// layer; this is just the handle the core hands back.
pub struct RemoteXServer {
    pub authority: AuthorityRecord,
    pub peer_address: String,
    pub display_number: u32,
}

/// A seat variant that binds at most one [`RemoteXServer`] across reconnects
/// instead of spawning a local one.
#[derive(Default)]
pub struct XDMCPSeat {
    remote: RefCell<Option<Rc<RemoteXServer>>>,
}

impl XDMCPSeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` for any session that isn't kind `X`. Otherwise returns the
    /// cached remote server, constructing it on the first call and returning
    /// the identical handle on every subsequent one -- a seat never binds a
    /// second remote server for its lifetime.
    pub fn create_display_server(&self, session: XdmcpSession) -> Option<Rc<RemoteXServer>> {
        if session.kind != SessionKind::X {
            return None;
        }

        if let Some(existing) = self.remote.borrow().as_ref() {
            return Some(existing.clone());
        }

        let remote = Rc::new(RemoteXServer {
            authority: session.authority,
            peer_address: session.peer_address.to_string(),
            display_number: session.display_number,
        });
        debug!(
            "binding seat to remote X server at {} on display :{}",
            remote.peer_address, remote.display_number
        );
        *self.remote.borrow_mut() = Some(remote.clone());
        Some(remote)
    }
}
