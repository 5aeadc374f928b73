//! Descriptor passing over Unix domain sockets.

use std::{
    io::{self, IoSlice, IoSliceMut},
    os::fd::{FromRawFd, OwnedFd, RawFd},
};

use nix::{
    cmsg_space,
    fcntl::{fcntl, FcntlArg, OFlag},
    sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags},
};

/// Most descriptors accepted from a single message.
const MAX_FDS_PER_MSG: usize = 4;

/// Sends `data`, attaching `fd` to the first byte when given.
pub(crate) fn send(socket: RawFd, data: &[u8], fd: Option<RawFd>) -> io::Result<usize> {
    let iov = [IoSlice::new(data)];
    let sent = match fd {
        Some(fd) => {
            let fds = [fd];
            let cmsgs = [ControlMessage::ScmRights(&fds)];
            sendmsg::<()>(socket, &iov, &cmsgs, MsgFlags::empty(), None)?
        }
        None => sendmsg::<()>(socket, &iov, &[], MsgFlags::empty(), None)?,
    };
    Ok(sent)
}

/// Receives into `buf`, returning the byte count and every descriptor that
/// arrived with it. Never waits, even on a blocking socket.
pub(crate) fn recv(socket: RawFd, buf: &mut [u8]) -> io::Result<(usize, Vec<OwnedFd>)> {
    let mut iov = [IoSliceMut::new(buf)];
    let mut cmsg_buf = cmsg_space!([RawFd; MAX_FDS_PER_MSG]);
    let flags = MsgFlags::MSG_CMSG_CLOEXEC | MsgFlags::MSG_DONTWAIT;
    let msg = recvmsg::<()>(socket, &mut iov, Some(&mut cmsg_buf), flags)?;

    let mut fds = Vec::new();
    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(raw) = cmsg {
            // SAFETY: the kernel just installed these descriptors in our
            // table and nothing else refers to them.
            fds.extend(raw.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
        }
    }
    Ok((msg.bytes, fds))
}

pub(crate) fn set_nonblocking_fd(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let bits = fcntl(fd, FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_truncate(bits);
    flags.set(OFlag::O_NONBLOCK, nonblocking);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{Read, Write},
        os::{fd::AsRawFd, unix::net::UnixStream},
    };

    #[test]
    fn test_send_fd_roundtrip() {
        let (a, b) = UnixStream::pair().unwrap();
        let (passed, mut kept) = UnixStream::pair().unwrap();

        assert_eq!(send(a.as_raw_fd(), b"h", Some(passed.as_raw_fd())).unwrap(), 1);
        let mut buf = [0u8; 8];
        let (n, fds) = recv(b.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(n, 1);
        assert_eq!(fds.len(), 1);

        let mut received = UnixStream::from(fds.into_iter().next().unwrap());
        received.write_all(b"via fd").unwrap();
        drop(received);
        drop(passed);

        let mut out = String::new();
        kept.read_to_string(&mut out).unwrap();
        assert_eq!(out, "via fd");
    }

    #[test]
    fn test_recv_on_idle_blocking_socket() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(
            recv(a.as_raw_fd(), &mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn test_nonblocking_toggle() {
        let (a, _b) = UnixStream::pair().unwrap();
        set_nonblocking_fd(a.as_raw_fd(), true).unwrap();
        let flags = OFlag::from_bits_truncate(fcntl(a.as_raw_fd(), FcntlArg::F_GETFL).unwrap());
        assert!(flags.contains(OFlag::O_NONBLOCK));
        set_nonblocking_fd(a.as_raw_fd(), false).unwrap();
        let flags = OFlag::from_bits_truncate(fcntl(a.as_raw_fd(), FcntlArg::F_GETFL).unwrap());
        assert!(!flags.contains(OFlag::O_NONBLOCK));
    }
}
