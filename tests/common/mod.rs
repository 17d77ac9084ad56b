//! Scripted loopback broker for integration tests.
//!
//! Each test accepts one (or more) client connections on a real TCP
//! listener and drives the broker side of the conversation with the
//! crate's own codec.

#![allow(dead_code)]

use photon::protocol::{read_packet, ConnAckPacket, ControlPacket};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

pub struct TestBroker {
    listener: TcpListener,
    pub url: String,
}

impl TestBroker {
    pub async fn listen() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("tcp://127.0.0.1:{}", listener.local_addr().unwrap().port());
        Self { listener, url }
    }

    /// Accept a connection, consume CONNECT, answer with the given code.
    pub async fn accept_session(&self, return_code: u8) -> BrokerSession {
        let (stream, _) = self.listener.accept().await.unwrap();
        let mut session = BrokerSession { stream };
        match session.recv().await {
            ControlPacket::Connect(_) => {}
            other => panic!("expected CONNECT, got {other:?}"),
        }
        session
            .send(ControlPacket::ConnAck(ConnAckPacket { return_code }))
            .await;
        session
    }

    /// Accept a connection and read CONNECT, but never answer.
    pub async fn accept_silent(&self) -> BrokerSession {
        let (stream, _) = self.listener.accept().await.unwrap();
        let mut session = BrokerSession { stream };
        match session.recv().await {
            ControlPacket::Connect(_) => {}
            other => panic!("expected CONNECT, got {other:?}"),
        }
        session
    }
}

pub struct BrokerSession {
    stream: TcpStream,
}

impl BrokerSession {
    pub async fn recv(&mut self) -> ControlPacket {
        read_packet(&mut self.stream).await.unwrap()
    }

    pub async fn send(&mut self, packet: ControlPacket) {
        self.stream.write_all(&packet.encode()).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Receive, asserting the packet is a PUBLISH, and hand it back.
    pub async fn recv_publish(&mut self) -> photon::protocol::PublishPacket {
        match self.recv().await {
            ControlPacket::Publish(publish) => publish,
            other => panic!("expected PUBLISH, got {other:?}"),
        }
    }

    /// Receive, asserting the packet is a SUBSCRIBE, and SUBACK it.
    pub async fn grant_subscribe(&mut self) -> u16 {
        match self.recv().await {
            ControlPacket::Subscribe(sub) => {
                let granted = sub.filters.iter().map(|f| f.qos.as_byte()).collect();
                let id = sub.packet_id;
                self.send(ControlPacket::SubAck(photon::protocol::SubAckPacket {
                    packet_id: id,
                    granted,
                }))
                .await;
                id
            }
            other => panic!("expected SUBSCRIBE, got {other:?}"),
        }
    }
}
