use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

/// A non-blocking datagram socket polled on the caller's clock.
///
/// `time` is the caller's absolute time in ms. Real sockets ignore it; the
/// emulator uses it for lag.
pub trait Transport {
    fn bind(&mut self, port: u16) -> io::Result<SocketAddr>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn connect(&mut self, addr: SocketAddr);

    /// The connected address, or the source of the last received datagram.
    fn remote_addr(&self) -> Option<SocketAddr>;

    fn send_to(&mut self, data: &[u8], addr: SocketAddr, time: f64) -> io::Result<usize>;

    /// Polls for one datagram. `Ok(None)` means nothing is ready yet. A size
    /// that fills `buffer` or exceeds it may mean the datagram was cut.
    fn receive(&mut self, buffer: &mut [u8], time: f64) -> io::Result<Option<(usize, SocketAddr)>>;

    fn close(&mut self);

    fn send(&mut self, data: &[u8], time: f64) -> io::Result<usize> {
        let addr = self
            .remote_addr()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "No remote address set"))?;
        self.send_to(data, addr, time)
    }

    fn set_receive_buffer_size(&mut self, _size: usize) {}

    fn dropped_count(&self) -> u64 {
        0
    }
}

#[derive(Debug, Default)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn socket(&self) -> io::Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "Socket is not bound"))
    }
}

impl Transport for UdpTransport {
    fn bind(&mut self, port: u16) -> io::Result<SocketAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;

        let local_addr = socket.local_addr()?;
        self.socket = Some(socket);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn connect(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn send_to(&mut self, data: &[u8], addr: SocketAddr, _time: f64) -> io::Result<usize> {
        self.socket()?.send_to(data, addr)
    }

    fn receive(&mut self, buffer: &mut [u8], _time: f64) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket()?.recv_from(buffer) {
            Ok((size, addr)) => {
                self.remote_addr = Some(addr);
                Ok(Some((size, addr)))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        self.socket = None;
        self.local_addr = None;
        self.remote_addr = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_socket_errors() {
        let mut transport = UdpTransport::new();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut buffer = [0u8; 16];

        assert!(transport.send_to(&[1], addr, 0.0).is_err());
        assert!(transport.receive(&mut buffer, 0.0).is_err());
        assert_eq!(
            transport.send(&[1], 0.0).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }

    #[test]
    fn test_loopback_poll() {
        let mut receiver = UdpTransport::new();
        let port = receiver.bind(0).unwrap().port();
        let mut sender = UdpTransport::new();
        sender.bind(0).unwrap();
        sender.connect(SocketAddr::from((Ipv4Addr::LOCALHOST, port)));

        let mut buffer = [0u8; 16];
        assert!(receiver.receive(&mut buffer, 0.0).unwrap().is_none());

        sender.send(&[4, 5, 6], 0.0).unwrap();
        let mut received = None;
        for _ in 0..200 {
            if let Some(result) = receiver.receive(&mut buffer, 0.0).unwrap() {
                received = Some(result);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let (size, _) = received.expect("datagram over loopback");
        assert_eq!(&buffer[..size], &[4, 5, 6]);
        assert!(receiver.remote_addr().is_some());
    }
}
