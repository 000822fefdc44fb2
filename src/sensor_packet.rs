//! Pose packets streamed to a remote receiver over UDP.
//!
//! Wire layout (big-endian f32, 100 bytes):
//! `head_pose[16] | accel[3] | gyro[3] | magnet[3]`

use log::{info, warn};
use std::net::{ToSocketAddrs, UdpSocket};

use crate::error::{Error, Result};

pub const POSE_PACKET_LEN: usize = (16 + 3 * 3) * 4;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PosePacket {
    /// Column-major head transform.
    pub head_pose: [f32; 16],
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
    pub magnet: [f32; 3],
}

impl PosePacket {
    pub fn encode(&self) -> [u8; POSE_PACKET_LEN] {
        let mut out = [0u8; POSE_PACKET_LEN];
        let values = self
            .head_pose
            .iter()
            .chain(&self.accel)
            .chain(&self.gyro)
            .chain(&self.magnet);
        for (chunk, value) in out.chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&value.to_be_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != POSE_PACKET_LEN {
            return Err(Error::Platform(format!(
                "pose packet must be {} bytes, got {}",
                POSE_PACKET_LEN,
                bytes.len()
            )));
        }
        let mut floats = bytes
            .chunks_exact(4)
            .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]));

        let mut packet = Self::default();
        let fields: [&mut [f32]; 4] = [
            &mut packet.head_pose,
            &mut packet.accel,
            &mut packet.gyro,
            &mut packet.magnet,
        ];
        for field in fields {
            for slot in field.iter_mut() {
                *slot = floats.next().unwrap_or_default();
            }
        }
        Ok(packet)
    }
}

/// Fire-and-forget UDP sender.
pub struct PoseStreamer {
    socket: UdpSocket,
    sent: u64,
    failed: u64,
}

impl PoseStreamer {
    pub fn connect(address: &str) -> Result<Self> {
        let target = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config(format!("pose stream address {address} did not resolve")))?;

        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(target)?;
        info!("Streaming poses to {}", target);

        Ok(Self {
            socket,
            sent: 0,
            failed: 0,
        })
    }

    /// Send failures are logged and dropped.
    pub fn send(&mut self, packet: &PosePacket) {
        match self.socket.send(&packet.encode()) {
            Ok(_) => self.sent += 1,
            Err(e) => {
                self.failed += 1;
                // One line per burst, not per frame.
                if self.failed == 1 || self.failed % 100 == 0 {
                    warn!("Pose packet send failed ({} so far): {}", self.failed, e);
                }
            }
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample() -> PosePacket {
        let mut head_pose = [0.0; 16];
        for (i, v) in head_pose.iter_mut().enumerate() {
            *v = i as f32;
        }
        PosePacket {
            head_pose,
            accel: [0.1, 9.81, -0.2],
            gyro: [0.0, 0.5, 0.0],
            magnet: [30.0, -12.5, 4.0],
        }
    }

    #[test]
    fn layout_is_big_endian_in_field_order() {
        let bytes = sample().encode();
        assert_eq!(bytes.len(), 100);
        assert_eq!(&bytes[4..8], &1.0f32.to_be_bytes());
        assert_eq!(&bytes[64..68], &0.1f32.to_be_bytes());
        assert_eq!(&bytes[76..80], &0.0f32.to_be_bytes());
        assert_eq!(&bytes[96..100], &4.0f32.to_be_bytes());
    }

    #[test]
    fn decode_rejects_short_packets() {
        assert!(PosePacket::decode(&[0u8; 99]).is_err());
        assert_eq!(PosePacket::decode(&sample().encode()).unwrap(), sample());
    }

    #[test]
    fn streams_over_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let address = receiver.local_addr().unwrap().to_string();

        let mut streamer = PoseStreamer::connect(&address).unwrap();
        streamer.send(&sample());

        let mut buf = [0u8; 256];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(PosePacket::decode(&buf[..n]).unwrap(), sample());
        assert_eq!(streamer.sent(), 1);
        assert_eq!(streamer.failed(), 0);
    }

    #[test]
    fn unresolvable_address_is_an_error() {
        assert!(PoseStreamer::connect("not an address").is_err());
    }
}
