//! Kernel link management over rtnetlink: just enough to create, inspect,
//! address, and tear down a WireGuard link by name.

/// Operational state of an existing link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperState {
    Up,
    Down,
}

#[cfg(target_os = "linux")]
mod linux {
    use crate::OperState;
    use ipnet::Ipv4Net;
    use netlink_packet_core::{
        NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REPLACE,
        NLM_F_REQUEST,
    };
    use netlink_packet_route::{
        address::nlas::Nla as AddressNla,
        constants::{AF_INET, IFF_UP},
        link::nlas::{Info, InfoKind, Nla as LinkNla, State},
        AddressMessage, LinkMessage, RtnlMessage,
    };
    use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
    use std::io;
    use wgtool::InterfaceName;

    // One datagram is plenty for the requests made here.
    const NETLINK_BUFFER_LEN: usize = 4096;

    /// Send one rtnetlink request and collect the substantive replies.
    /// The kernel closes the conversation with an ack, a done marker, or
    /// an error; only inner messages are returned to the caller.
    fn rtnl_request(
        message: RtnlMessage,
        flags: u16,
    ) -> Result<Vec<NetlinkMessage<RtnlMessage>>, io::Error> {
        let mut req = NetlinkMessage::from(message);
        req.header.flags = flags;
        req.finalize();

        let len = req.buffer_len();
        if len > NETLINK_BUFFER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "netlink request does not fit in a single datagram",
            ));
        }

        let mut buf = [0u8; NETLINK_BUFFER_LEN];
        req.serialize(&mut buf);

        let socket = Socket::new(NETLINK_ROUTE)?;
        socket.connect(&SocketAddr::new(0, 0))?;
        if socket.send(&buf[..len], 0)? != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short netlink send",
            ));
        }

        let mut replies = vec![];
        loop {
            let received = socket.recv(&mut &mut buf[..], 0)?;
            let mut window = &buf[..received];

            // A datagram can carry several messages; each one records its
            // own length.
            while !window.is_empty() {
                let reply = NetlinkMessage::<RtnlMessage>::deserialize(window)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                let taken = (reply.header.length as usize).min(window.len());

                match &reply.payload {
                    // The kernel reports errors as negative errno values.
                    NetlinkPayload::Error(e) => {
                        return Err(io::Error::from_raw_os_error(-e.code))
                    },
                    NetlinkPayload::Ack(_) | NetlinkPayload::Done => return Ok(replies),
                    _ => replies.push(reply),
                }

                if taken == 0 {
                    break;
                }
                window = &window[taken..];
            }
        }
    }

    fn if_nametoindex(iface: &InterfaceName) -> Result<u32, io::Error> {
        match unsafe { libc::if_nametoindex(iface.as_ptr()) } {
            0 => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("couldn't find interface {iface}"),
            )),
            index => Ok(index),
        }
    }

    /// Look up a link by name. `Ok(None)` means no link with that name
    /// exists.
    pub fn find_link(iface: &InterfaceName) -> Result<Option<OperState>, io::Error> {
        let mut message = LinkMessage::default();
        message
            .nlas
            .push(LinkNla::IfName(iface.as_str_lossy().to_string()));

        let replies = match rtnl_request(RtnlMessage::GetLink(message), NLM_F_REQUEST | NLM_F_ACK)
        {
            Ok(replies) => replies,
            Err(e) if e.raw_os_error() == Some(libc::ENODEV) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut found = None;
        for reply in &replies {
            if let NetlinkPayload::InnerMessage(RtnlMessage::NewLink(link)) = &reply.payload {
                let up = link
                    .nlas
                    .iter()
                    .any(|nla| matches!(nla, LinkNla::OperState(State::Up)));
                found = Some(if up { OperState::Up } else { OperState::Down });
            }
        }

        Ok(found)
    }

    /// Create a new link of kind `wireguard`. Fails if a link with that
    /// name already exists.
    pub fn add_link(iface: &InterfaceName) -> Result<(), io::Error> {
        let mut message = LinkMessage::default();
        message
            .nlas
            .push(LinkNla::IfName(iface.as_str_lossy().to_string()));
        message
            .nlas
            .push(LinkNla::Info(vec![Info::Kind(InfoKind::Wireguard)]));

        rtnl_request(
            RtnlMessage::NewLink(message),
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        )?;
        log::debug!("added wireguard link {iface}");
        Ok(())
    }

    /// Delete a link by name. Succeeds if the link is already gone.
    pub fn del_link(iface: &InterfaceName) -> Result<(), io::Error> {
        let mut message = LinkMessage::default();
        message
            .nlas
            .push(LinkNla::IfName(iface.as_str_lossy().to_string()));

        match rtnl_request(RtnlMessage::DelLink(message), NLM_F_REQUEST | NLM_F_ACK) {
            Ok(_) => {
                log::debug!("deleted link {iface}");
                Ok(())
            },
            Err(e) if e.raw_os_error() == Some(libc::ENODEV) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Add `addr` to the link.
    pub fn set_addr(iface: &InterfaceName, addr: Ipv4Net) -> Result<(), io::Error> {
        let index = if_nametoindex(iface)?;
        let mut message = AddressMessage::default();
        message.header.family = AF_INET as u8;
        message.header.prefix_len = addr.prefix_len();
        message.header.index = index;
        let octets = addr.addr().octets().to_vec();
        message.nlas.push(AddressNla::Address(octets.clone()));
        message.nlas.push(AddressNla::Local(octets));

        rtnl_request(
            RtnlMessage::NewAddress(message),
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_REPLACE | NLM_F_CREATE,
        )?;
        log::debug!("set address {addr} on interface {iface}");
        Ok(())
    }

    /// Transition the link to the up operational state.
    pub fn set_up(iface: &InterfaceName) -> Result<(), io::Error> {
        let index = if_nametoindex(iface)?;
        let mut message = LinkMessage::default();
        message.header.index = index;
        message.header.flags = IFF_UP;
        message.header.change_mask = IFF_UP;

        rtnl_request(RtnlMessage::SetLink(message), NLM_F_REQUEST | NLM_F_ACK)?;
        log::debug!("set interface {iface} up");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub use linux::{add_link, del_link, find_link, set_addr, set_up};
