/*!
 * Wake-on-LAN support.
 *
 * Workers handle the wake command by broadcasting a standard magic packet
 * to UDP port 9: six 0xFF bytes followed by the target MAC repeated
 * sixteen times.
 */
use tokio::net::UdpSocket;
use tracing::info;

use crate::error::Result;
use crate::transport::TransportError;

/// UDP port magic packets are broadcast to
pub const WOL_PORT: u16 = 9;

/// Size of a magic packet in bytes
pub const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

/// Parse a MAC address given as six hex octets separated by `:` or `-`
pub fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let octets: Vec<&str> = mac.trim().split([':', '-']).collect();
    if octets.len() != 6 {
        return Err(TransportError::InvalidPayload(format!(
            "MAC address '{}' must have 6 octets",
            mac
        ))
        .into());
    }

    let mut bytes = [0u8; 6];
    for (index, octet) in octets.iter().enumerate() {
        bytes[index] = u8::from_str_radix(octet, 16).map_err(|_| {
            TransportError::InvalidPayload(format!(
                "MAC address '{}' has a non-hex octet '{}'",
                mac, octet
            ))
        })?;
    }
    Ok(bytes)
}

/// Build the magic packet for a MAC address
pub fn magic_packet(mac: &str) -> Result<[u8; MAGIC_PACKET_LEN]> {
    let target = parse_mac(mac)?;
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for repeat in 0..16 {
        let offset = 6 + repeat * 6;
        packet[offset..offset + 6].copy_from_slice(&target);
    }
    Ok(packet)
}

/// Broadcast a magic packet for the given MAC address
pub async fn send_magic_packet(mac: &str) -> Result<()> {
    let packet = magic_packet(mac)?;

    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    socket
        .send_to(&packet, ("255.255.255.255", WOL_PORT))
        .await?;

    info!(mac = mac, "sent wake-on-lan magic packet");
    Ok(())
}
