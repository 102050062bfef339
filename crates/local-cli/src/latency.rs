use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::error::Error;
use crate::runner::SubscriberReport;

/// One received message, as recorded by a subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LatencySample {
    /// Time since the subscriber started receiving.
    pub elapsed: Duration,
    pub topic: String,
    pub publisher_id: String,
    pub latency: Duration,
}

const HEADER: &str = "subscriber,topic,publisher,elapsed_ms,latency_us";

/// Writes every subscriber's samples to `path`, replacing the file.
pub fn write_csv(path: &Path, subscribers: &[SubscriberReport]) -> Result<(), Error> {
    let write_error = |source| Error::WriteLatency {
        path: path.display().to_string(),
        source,
    };

    let file = File::create(path).map_err(write_error)?;
    let mut writer = BufWriter::new(file);
    let rows = write_rows(&mut writer, subscribers).map_err(write_error)?;
    writer.flush().map_err(write_error)?;

    info!("wrote {} latency samples to {}", rows, path.display());

    Ok(())
}

fn write_rows<W: Write>(writer: &mut W, subscribers: &[SubscriberReport]) -> std::io::Result<usize> {
    writeln!(writer, "{HEADER}")?;

    let mut rows = 0;
    for subscriber in subscribers {
        for sample in &subscriber.samples {
            writeln!(
                writer,
                "{},{},{},{},{}",
                subscriber.id,
                sample.topic,
                sample.publisher_id,
                sample.elapsed.as_millis(),
                sample.latency.as_micros()
            )?;
            rows += 1;
        }
    }

    Ok(rows)
}
