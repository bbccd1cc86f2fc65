use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;

use crate::prelude::*;

/// Byte-level access to the inverter link, as seen from the engine. None
/// of these calls may block.
pub trait Transport: Send {
    /// Bytes that can be read right now.
    fn available(&mut self) -> usize;
    fn read_byte(&mut self) -> Option<u8>;
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;
}

/// Engine side of the serial port. Bytes move to and from the port task
/// over unbounded channels so the engine never waits on I/O.
pub struct SerialLink {
    rx: mpsc::UnboundedReceiver<Bytes>,
    tx: mpsc::UnboundedSender<Bytes>,
    pending: BytesMut,
}

impl SerialLink {
    fn fill(&mut self) {
        while let Ok(chunk) = self.rx.try_recv() {
            self.pending.extend_from_slice(&chunk);
        }
    }
}

impl Transport for SerialLink {
    fn available(&mut self) -> usize {
        self.fill();
        self.pending.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        if self.pending.is_empty() {
            self.fill();
        }
        if self.pending.has_remaining() {
            Some(self.pending.get_u8())
        } else {
            None
        }
    }

    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.tx
            .send(Bytes::copy_from_slice(bytes))
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "serial task gone"))
    }
}

/// Owns the actual port: 8N1 at the configured baud rate.
pub struct SerialPort {
    config: config::Serial,
    to_link: mpsc::UnboundedSender<Bytes>,
    from_link: mpsc::UnboundedReceiver<Bytes>,
    channels: Channels,
}

impl SerialPort {
    pub fn new(config: config::Serial, channels: Channels) -> (Self, SerialLink) {
        let (to_link, link_rx) = mpsc::unbounded_channel();
        let (link_tx, from_link) = mpsc::unbounded_channel();

        let port = Self {
            config,
            to_link,
            from_link,
            channels,
        };
        let link = SerialLink {
            rx: link_rx,
            tx: link_tx,
            pending: BytesMut::new(),
        };

        (port, link)
    }

    /// Keep the port open until shutdown. A port that cannot be opened or
    /// fails mid-stream is reopened after the reconnect delay; the engine
    /// sees nothing but a reply timeout.
    pub async fn start(mut self) -> Result<()> {
        let mut shutdown = self.channels.shutdown.subscribe();

        while let Err(err) = self.connect(&mut shutdown).await {
            error!("serial {}: {}", self.config.port(), err);
            info!(
                "serial {}: reconnecting in {}ms",
                self.config.port(),
                self.config.reconnect_delay_ms()
            );

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.config.reconnect_delay_ms())) => {}
                _ = shutdown.recv() => {
                    info!("serial port shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One session on the port. `Ok` means stop for good: shutdown was
    /// requested or the engine went away.
    async fn connect(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<()> {
        info!(
            "opening {} at {} baud",
            self.config.port(),
            self.config.baud_rate()
        );

        let mut port = tokio_serial::new(self.config.port(), self.config.baud_rate())
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .open_native_async()
            .map_err(|err| anyhow!("error opening {}: {}", self.config.port(), err))?;

        // anything queued while the port was down has timed out already
        let mut stale = 0;
        while self.from_link.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("dropped {} stale outbound frames", stale);
        }

        let mut buf = [0u8; 256];

        loop {
            tokio::select! {
                read = port.read(&mut buf) => {
                    let len = read?;
                    if len == 0 {
                        bail!("{} closed", self.config.port());
                    }
                    trace!("serial rx {} bytes", len);
                    if self.to_link.send(Bytes::copy_from_slice(&buf[..len])).is_err() {
                        // engine is gone
                        return Ok(());
                    }
                }
                Some(frame) = self.from_link.recv() => {
                    port.write_all(&frame).await?;
                    port.flush().await?;
                }
                _ = shutdown.recv() => {
                    info!("serial port shutting down");
                    return Ok(());
                }
            }
        }
    }
}
