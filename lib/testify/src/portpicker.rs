use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

use rand::Rng;

// The syslog listeners bind TCP and UDP on the same port, so a port is
// only handed out when both are free.
fn is_free(ip: IpAddr, port: u16) -> bool {
    let addr = SocketAddr::new(ip, port);
    TcpListener::bind(addr).is_ok() && UdpSocket::bind(addr).is_ok()
}

fn ask_free_tcp_port(ip: IpAddr) -> Option<u16> {
    Some(
        TcpListener::bind(SocketAddr::new(ip, 0))
            .ok()?
            .local_addr()
            .ok()?
            .port(),
    )
}

/// Picks a port that is free on both TCP and UDP.
pub fn pick_unused_port(ip: IpAddr) -> u16 {
    let mut rng = rand::rng();

    loop {
        for _ in 0..10 {
            let port = rng.random_range(15000..25000);
            if is_free(ip, port) {
                return port;
            }
        }

        for _ in 0..10 {
            if let Some(port) = ask_free_tcp_port(ip)
                && is_free(ip, port)
            {
                return port;
            }
        }
    }
}

/// A loopback address on a port that is free for both protocols.
pub fn next_addr() -> SocketAddr {
    let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
    SocketAddr::new(ip, pick_unused_port(ip))
}
