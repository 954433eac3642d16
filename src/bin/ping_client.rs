//! Minimal client: sends pings and checks that each pong echoes its sequence.

use std::time::{Duration, Instant};

use clap::Parser;
use rtgate::network::codec::read_u16_le;
use rtgate::network::{encode_frame, Ping, Pong, C_PING, S_PONG};
use rtgate::{setup_local_tracing, AppError, AppResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// server address
    #[arg(short, long, default_value = "127.0.0.1:7777")]
    pub addr: String,
    /// number of pings to send
    #[arg(short = 'n', long, default_value_t = 5)]
    pub count: u32,
    /// first sequence number
    #[arg(long, default_value_t = 1)]
    pub start_seq: u32,
    /// pause between pings in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,
}

async fn read_pong(stream: &mut TcpStream) -> AppResult<Pong> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let length = read_u16_le(&len_buf, 0).unwrap_or_default() as usize;
    if length < 2 {
        return Err(AppError::MalformedPayload(format!(
            "frame length {} too small",
            length
        )));
    }

    let mut rest = vec![0u8; length];
    stream.read_exact(&mut rest).await?;
    let message_id = read_u16_le(&rest, 0).unwrap_or_default();
    if message_id != S_PONG {
        return Err(AppError::UnknownMessage(message_id));
    }
    Pong::decode(&rest[2..])
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> AppResult<()> {
    setup_local_tracing()?;
    let commandline = CommandLine::parse();

    let mut stream = TcpStream::connect(&commandline.addr).await?;
    stream.set_nodelay(true)?;
    info!("connected to {}", commandline.addr);

    for seq in commandline.start_seq..commandline.start_seq.saturating_add(commandline.count) {
        let started = Instant::now();
        let frame = encode_frame(C_PING, &Ping { seq }.encode());
        stream.write_all(&frame).await?;

        let pong = read_pong(&mut stream).await?;
        if pong.seq != seq {
            warn!(sent = seq, received = pong.seq, "sequence mismatch");
            return Err(AppError::MalformedPayload(format!(
                "pong seq {} does not match ping seq {}",
                pong.seq, seq
            )));
        }
        info!(seq, rtt_us = started.elapsed().as_micros() as u64, "pong");

        tokio::time::sleep(Duration::from_millis(commandline.interval_ms)).await;
    }

    Ok(())
}
