//! Host-side demo of the gateway relay pipeline: a feeder task plays the
//! radio interrupt callback with synthetic compact frames (and the odd
//! transport fault), while the consumer republishes them through a bus that
//! just logs and a display that prints its panel on every flush.

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use env_logger::Builder;
use log::LevelFilter;
use log::{log, Level};
use mailbox_link::{FrameBuffer, GatewayConfiguration, MessageBus, QoS, RelayPipeline, RxFault, StatusDisplay};

static FRAME_BUFFER: FrameBuffer = FrameBuffer::new();

/// Bus stand-in: every publish/subscribe lands in the log.
struct LogBus;

impl MessageBus for LogBus {
    type Error = core::convert::Infallible;

    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool, qos: QoS) -> Result<(), Self::Error> {
        log!(
            Level::Info,
            "publish {} (retain: {}, qos: {:?}): {}",
            topic,
            retain,
            qos,
            String::from_utf8_lossy(payload)
        );
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        log!(Level::Info, "subscribe {} (qos: {:?})", topic, qos);
        Ok(())
    }
}

/// Display stand-in that prints the assembled panel on flush.
#[derive(Default)]
struct ConsoleDisplay {
    lines: Vec<String>,
}

impl StatusDisplay for ConsoleDisplay {
    fn clear(&mut self) {
        self.lines.clear();
    }

    fn draw_text(&mut self, text: &str, _x: u8, _y: u8) {
        self.lines.push(text.to_string());
    }

    fn flush(&mut self) {
        log!(Level::Debug, "panel: {}", self.lines.join(" | "));
    }
}

#[embassy_executor::task]
async fn feeder(buffer: &'static FrameBuffer) {
    let mut boot_count: u32 = 0;
    loop {
        let frame = format!("SmbMopenR-42N5.5B3.907C{}", boot_count);
        log!(Level::Debug, "feeding frame: {}", frame);
        buffer.frame_received(Ok(frame.as_bytes()));
        boot_count += 1;

        // Every fourth reception fails at the transport level.
        if boot_count % 4 == 0 {
            buffer.frame_received(Err(RxFault::CrcMismatch));
        }

        Timer::after(Duration::from_secs(5)).await;
    }
}

#[embassy_executor::task]
async fn consumer(buffer: &'static FrameBuffer) -> ! {
    let config = GatewayConfiguration::new("demo/lora").unwrap();
    let mut pipeline = RelayPipeline::new(buffer, config);
    let mut bus = LogBus;
    let mut display = ConsoleDisplay::default();
    pipeline.run(&mut bus, &mut display).await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    Builder::new().filter_level(LevelFilter::Debug).init();
    log!(Level::Info, "starting relay demo");

    spawner.spawn(feeder(&FRAME_BUFFER)).unwrap();
    spawner.spawn(consumer(&FRAME_BUFFER)).unwrap();
}
