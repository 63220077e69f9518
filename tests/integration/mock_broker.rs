//! A scripted MQTT 3.1.1 broker for driving the subscriber over real TCP
//!
//! Each accepted connection plays the next [`Session`]; the last one repeats.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use porty::config::BrokerConfig;
use porty::connection::ReconnectPolicy;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const CONNECT: u8 = 1;
const SUBSCRIBE: u8 = 8;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

pub const TOPIC: &str = "multiSensor/numeric";

/// SUBACK return code granting QoS 1
pub const GRANTED: u8 = 0x01;

/// SUBACK return code refusing the subscription
pub const REFUSED: u8 = 0x80;

/// What the broker does on one connection
#[derive(Debug, Clone)]
pub struct Session {
    pub suback: u8,
    pub suback_delay: Duration,
    pub publish: Vec<String>,
    pub hang_up: bool,
}

impl Session {
    pub fn granted() -> Self {
        Self {
            suback: GRANTED,
            suback_delay: Duration::ZERO,
            publish: Vec::new(),
            hang_up: false,
        }
    }

    pub fn refused() -> Self {
        Self {
            suback: REFUSED,
            ..Self::granted()
        }
    }

    /// Publish `payloads` right after the SUBACK
    pub fn publishing(mut self, payloads: &[&str]) -> Self {
        self.publish = payloads.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Hold the SUBACK back for `delay`
    pub fn delay_suback(mut self, delay: Duration) -> Self {
        self.suback_delay = delay;
        self
    }

    /// Close the socket once everything is published
    pub fn then_hang_up(mut self) -> Self {
        self.hang_up = true;
        self
    }
}

pub struct MockBroker {
    pub port: u16,
    connections: Arc<AtomicUsize>,
    subscribes: Arc<AtomicUsize>,
}

impl MockBroker {
    pub async fn start(sessions: Vec<Session>) -> Self {
        assert!(!sessions.is_empty());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let subscribes = Arc::new(AtomicUsize::new(0));

        tokio::spawn({
            let connections = connections.clone();
            let subscribes = subscribes.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let index = connections.fetch_add(1, Ordering::SeqCst);
                    let session = sessions[index.min(sessions.len() - 1)].clone();
                    tokio::spawn(serve(stream, session, subscribes.clone()));
                }
            }
        });

        Self {
            port,
            connections,
            subscribes,
        }
    }

    /// TCP connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// SUBSCRIBE packets received so far
    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Plain-TCP client config pointing at this broker
    pub fn config(&self, reconnect: ReconnectPolicy) -> BrokerConfig {
        let mut config: BrokerConfig = serde_json::from_value(serde_json::json!({
            "host": "127.0.0.1",
            "port": self.port,
            "tls": false,
        }))
        .unwrap();
        config.topic = TOPIC.to_string();
        config.reconnect = reconnect;
        config
    }
}

async fn serve(mut stream: TcpStream, session: Session, subscribes: Arc<AtomicUsize>) {
    while let Ok((header, body)) = read_packet(&mut stream).await {
        match header >> 4 {
            CONNECT => {
                if stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.is_err() {
                    return;
                }
            }
            SUBSCRIBE => {
                subscribes.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(session.suback_delay).await;

                let suback = [0x90, 0x03, body[0], body[1], session.suback];
                if stream.write_all(&suback).await.is_err() {
                    return;
                }
                for payload in &session.publish {
                    if stream.write_all(&publish_packet(TOPIC, payload)).await.is_err() {
                        return;
                    }
                }
                if session.hang_up {
                    let _ = stream.flush().await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    return;
                }
            }
            PINGREQ => {
                if stream.write_all(&[0xd0, 0x00]).await.is_err() {
                    return;
                }
            }
            DISCONNECT => return,
            _ => {}
        }
    }
}

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;

    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0; len];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

fn publish_packet(topic: &str, payload: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload.as_bytes());

    // QoS 0 publish
    let mut packet = vec![0x30];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend(body);
    packet
}
