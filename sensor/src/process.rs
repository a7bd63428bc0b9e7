use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::PathBuf,
};

use anyhow::Context;
use clap::Args;
use csi::{
    frame::RecordReader,
    proc::{Interpolation, Pipeline},
    CsiRecord,
};
use tracing::info;

/// Post-processes a saved capture.
#[derive(Debug, Clone, Args)]
pub struct ProcessArgs {
    /// Capture file of concatenated records
    pub input: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,

    /// Fill in pilot subcarriers: linear, cubic or cosine
    #[arg(long)]
    pub interpolation: Option<Interpolation>,

    /// Remove the linear phase trend of each antenna pair
    #[arg(long)]
    pub calibrate: bool,

    /// Write one CSV row per sample instead of binary records
    #[arg(long)]
    pub csv: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

impl ProcessArgs {
    pub fn pipeline(&self) -> Pipeline {
        Pipeline {
            interpolation: self.interpolation,
            calibrate: self.calibrate,
        }
    }
}

/// Encoding of processed records.
enum Writer<W: Write> {
    Binary(W),
    Csv(csv::Writer<W>),
}

impl<W: Write> Writer<W> {
    fn new(inner: W, csv: bool) -> anyhow::Result<Self> {
        Ok(if csv {
            let mut w = csv::Writer::from_writer(inner);
            w.write_record(["rx", "tx", "subcarrier", "magnitude", "phase"])?;
            Writer::Csv(w)
        } else {
            Writer::Binary(inner)
        })
    }

    fn write(&mut self, record: &CsiRecord) -> anyhow::Result<()> {
        match self {
            Writer::Binary(w) => w.write_all(&record.processed_bytes())?,
            Writer::Csv(w) => {
                for ((rx, tx, k), mag) in record.magnitude().indexed_iter() {
                    let phase = record.phase()[(rx, tx, k)];
                    w.write_record(&[
                        rx.to_string(),
                        tx.to_string(),
                        k.to_string(),
                        mag.to_string(),
                        phase.to_string(),
                    ])?;
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> anyhow::Result<()> {
        match self {
            Writer::Binary(mut w) => w.flush()?,
            Writer::Csv(mut w) => w.flush()?,
        }
        Ok(())
    }
}

/// Runs `pipeline` over every record read from `input`. Returns the number
/// of records written.
pub fn process(
    input: impl Read,
    output: impl Write,
    pipeline: Pipeline,
    csv: bool,
) -> anyhow::Result<usize> {
    let mut writer = Writer::new(output, csv)?;
    let mut count = 0;
    for record in RecordReader::new(input) {
        let mut record = record.with_context(|| format!("reading record {count}"))?;
        pipeline.apply(&mut record);
        writer.write(&record)?;
        count += 1;
    }
    writer.finish()?;
    Ok(count)
}

pub fn run(args: &ProcessArgs) -> anyhow::Result<()> {
    let input = File::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let output = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;

    let count = process(
        BufReader::new(input),
        BufWriter::new(output),
        args.pipeline(),
        args.csv,
    )?;
    info!(count, output = %args.output.display(), "processed capture");
    Ok(())
}
