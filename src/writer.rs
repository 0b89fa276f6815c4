//! Archive output.
//!
//! A document is written as a zip archive: `nwb.json` describes the hierarchy,
//! metadata and tables, and every array is stored as its own `.npy` entry.
//! Long recordings are stored as numbered chunks under a `data/` folder so
//! the writer never holds more than one chunk in memory.

use std::any::type_name;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info};
use ndarray::{Array1, ArrayBase, Data, Dimension};
use ndarray_npy::{ReadNpyExt, ReadableElement, WritableElement, WriteNpyExt};
use serde_json::{json, Map, Value};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::document::{
    Acquisition, BehavioralTimeSeries, Column, ColumnData, ElectricalSeries, Fret, FretSeries, NwbDocument,
    TrialTable,
};
use crate::error::{require_file, ConvertError, Result};
use crate::frames::{ACTIVE_ROWS, SLAB_COLS};

/// Name of the manifest entry
pub const MANIFEST_NAME: &str = "nwb.json";
/// Manifest layout version
pub const FORMAT_VERSION: u32 = 1;

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    pub path: PathBuf,
    pub bytes: u64,
}

impl WriteReport {
    /// Size in megabytes (10^6 bytes)
    pub fn size_mb(&self) -> f64 {
        self.bytes as f64 / 1e6
    }
}

// Entry names only use '/' as a separator
fn entry_name(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.replace(['/', '\\'], "_"))
        .collect::<Vec<_>>()
        .join("/")
}

struct ArchiveWriter {
    zip: ZipWriter<BufWriter<File>>,
    options: SimpleFileOptions,
}

impl ArchiveWriter {
    fn array<A, S, D>(&mut self, name: &str, array: &ArrayBase<S, D>) -> Result<Value>
    where
        A: WritableElement,
        S: Data<Elem = A>,
        D: Dimension,
    {
        self.zip.start_file(name, self.options)?;
        array.write_npy(&mut self.zip)?;
        Ok(json!({
            "path": name,
            "dtype": type_name::<A>(),
            "shape": array.shape(),
        }))
    }

    /// Writes each chunk as `<prefix>/data/NNNNN.npy`, concatenated along axis 0.
    fn chunked<A, D, I>(&mut self, prefix: &str, trailing_shape: &[usize], chunks: I) -> Result<Value>
    where
        A: WritableElement,
        D: Dimension,
        I: Iterator<Item = Result<ndarray::Array<A, D>>>,
    {
        let mut paths = Vec::new();
        let mut rows = 0;
        for (index, chunk) in chunks.enumerate() {
            let chunk = chunk?;
            if &chunk.shape()[1..] != trailing_shape {
                return Err(ConvertError::SchemaMismatch(format!(
                    "{}: chunk {} has shape {:?}, expected [_, {:?}]",
                    prefix,
                    index,
                    chunk.shape(),
                    trailing_shape
                )));
            }
            let name = format!("{}/data/{:05}.npy", prefix, index);
            self.array(&name, &chunk)?;
            debug!("Wrote {} ({} rows)", name, chunk.shape()[0]);
            rows += chunk.shape()[0];
            paths.push(name);
        }

        let mut shape = vec![rows];
        shape.extend_from_slice(trailing_shape);
        Ok(json!({
            "chunks": paths,
            "dtype": type_name::<A>(),
            "shape": shape,
        }))
    }

    fn json(&mut self, name: &str, value: &Value) -> Result<()> {
        self.zip.start_file(name, self.options)?;
        serde_json::to_writer_pretty(&mut self.zip, value)?;
        Ok(())
    }
}

fn write_column(out: &mut ArchiveWriter, column: &Column) -> Result<Value> {
    let path = entry_name(&["intervals", "trials", &format!("{}.npy", column.name)]);
    let (kind, data) = match &column.data {
        ColumnData::Int(v) => ("int", out.array(&path, &Array1::from(v.clone()))?),
        ColumnData::Float(v) => ("float", out.array(&path, &Array1::from(v.clone()))?),
        ColumnData::Bool(v) => ("bool", out.array(&path, &Array1::from(v.clone()))?),
        ColumnData::Text(v) => ("text", json!({ "values": v })),
        ColumnData::Ragged(v) => ("ragged", json!({ "values": v })),
    };
    Ok(json!({
        "name": column.name,
        "description": column.description,
        "kind": kind,
        "data": data,
    }))
}

fn write_trials(out: &mut ArchiveWriter, trials: &TrialTable) -> Result<Value> {
    let start = out.array(
        "intervals/trials/start_time.npy",
        &Array1::from(trials.start_times().to_vec()),
    )?;
    let stop = out.array(
        "intervals/trials/stop_time.npy",
        &Array1::from(trials.stop_times().to_vec()),
    )?;
    let columns = trials
        .columns()
        .iter()
        .map(|c| write_column(out, c))
        .collect::<Result<Vec<_>>>()?;
    Ok(json!({
        "count": trials.len(),
        "start_time": start,
        "stop_time": stop,
        "columns": columns,
    }))
}

fn write_fret_series(out: &mut ArchiveWriter, fret_name: &str, series: &FretSeries) -> Result<Value> {
    let prefix = entry_name(&["acquisition", fret_name, &series.name]);
    info!(
        "Writing FRET series '{}' ({} frames)",
        series.name,
        series.data.frame_count()
    );
    let data = out.chunked(&prefix, &[ACTIVE_ROWS, SLAB_COLS], series.data.chunks())?;
    Ok(json!({
        "name": series.name,
        "description": series.description,
        "fluorophore": series.fluorophore,
        "unit": series.unit,
        "rate": series.rate,
        "starting_time": 0.0,
        "emission_lambda": series.emission_lambda,
        "device": series.device,
        "optical_channel": {
            "name": series.optical_channel.name,
            "description": series.optical_channel.description,
            "emission_lambda": series.optical_channel.emission_lambda,
        },
        "sign_convention": format!("{:?}", series.data.sign()),
        "data": data,
    }))
}

fn write_fret(out: &mut ArchiveWriter, fret: &Fret) -> Result<Value> {
    Ok(json!({
        "type": "FRET",
        "name": fret.name,
        "excitation_lambda": fret.excitation_lambda,
        "donor": write_fret_series(out, &fret.name, &fret.donor)?,
        "acceptor": write_fret_series(out, &fret.name, &fret.acceptor)?,
    }))
}

fn write_electrical_series(out: &mut ArchiveWriter, series: &ElectricalSeries) -> Result<Value> {
    let prefix = entry_name(&["acquisition", &series.name]);
    info!(
        "Writing ElectricalSeries '{}' from {} file(s)",
        series.name,
        series.data.files().len()
    );
    let data = out.chunked(&prefix, &[series.data.num_channels()], series.data.chunks())?;
    Ok(json!({
        "type": "ElectricalSeries",
        "name": series.name,
        "description": series.description,
        "unit": "microvolts",
        "rate": series.rate,
        "starting_time": series.starting_time,
        "conversion": series.conversion,
        "electrodes": series.electrodes,
        "data": data,
    }))
}

fn write_behavioral(out: &mut ArchiveWriter, container: &BehavioralTimeSeries) -> Result<Value> {
    let mut series = Vec::with_capacity(container.series.len());
    for ts in &container.series {
        let data = out.array(
            &entry_name(&["acquisition", &container.name, &ts.name, "data.npy"]),
            &ts.data,
        )?;
        let timestamps = out.array(
            &entry_name(&["acquisition", &container.name, &ts.name, "timestamps.npy"]),
            &ts.timestamps,
        )?;
        series.push(json!({
            "name": ts.name,
            "description": ts.description,
            "unit": ts.unit,
            "data": data,
            "timestamps": timestamps,
        }));
    }
    Ok(json!({
        "type": "BehavioralTimeSeries",
        "name": container.name,
        "time_series": series,
    }))
}

/// Writes `doc` to `path`, replacing any existing file.
///
/// Fails with `Config` before touching the file system when no session
/// start time was claimed.
pub fn write_document(doc: &NwbDocument, path: &Path) -> Result<WriteReport> {
    let start = doc.session_start().ok_or_else(|| {
        ConvertError::Config(
            "no session start time: set NWBFile.session_start_time or add a section that provides one"
                .to_string(),
        )
    })?;
    let tic = Instant::now();

    let file = BufWriter::new(File::create(path)?);
    let mut out = ArchiveWriter {
        zip: ZipWriter::new(file),
        options: SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true),
    };

    let trials = write_trials(&mut out, &doc.trials)?;
    let acquisition = doc
        .acquisition
        .iter()
        .map(|a| match a {
            Acquisition::Fret(f) => write_fret(&mut out, f),
            Acquisition::ElectricalSeries(e) => write_electrical_series(&mut out, e),
            Acquisition::BehavioralTimeSeries(b) => write_behavioral(&mut out, b),
        })
        .collect::<Result<Vec<_>>>()?;

    let electrodes: Vec<Value> = doc
        .electrodes
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "x": e.x,
                "y": e.y,
                "z": e.z,
                "imp": e.imp,
                "location": e.location,
                "filtering": e.filtering,
                "group": e.group,
            })
        })
        .collect();

    let mut manifest = Map::new();
    manifest.insert("format_version".into(), json!(FORMAT_VERSION));
    manifest.insert("session_description".into(), json!(doc.session_description));
    manifest.insert("identifier".into(), json!(doc.identifier));
    manifest.insert(
        "session_start_time".into(),
        json!(start.time.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
    );
    manifest.insert("session_start_source".into(), json!(start.source));
    manifest.insert("file_fields".into(), serde_json::to_value(&doc.file_fields)?);
    manifest.insert("subject".into(), serde_json::to_value(&doc.subject)?);
    manifest.insert(
        "devices".into(),
        Value::Array(
            doc.devices
                .iter()
                .map(|d| json!({ "name": d.name, "description": d.description }))
                .collect(),
        ),
    );
    manifest.insert(
        "electrode_groups".into(),
        Value::Array(
            doc.electrode_groups
                .iter()
                .map(|g| {
                    json!({
                        "name": g.name,
                        "description": g.description,
                        "location": g.location,
                        "device": g.device,
                    })
                })
                .collect(),
        ),
    );
    manifest.insert("electrodes".into(), Value::Array(electrodes));
    manifest.insert("intervals".into(), json!({ "trials": trials }));
    manifest.insert("acquisition".into(), Value::Array(acquisition));
    out.json(MANIFEST_NAME, &Value::Object(manifest))?;

    let mut file = out.zip.finish()?;
    std::io::Write::flush(&mut file)?;
    drop(file);

    let report = WriteReport {
        path: path.to_path_buf(),
        bytes: fs::metadata(path)?.len(),
    };
    info!(
        "NWB file saved with size: {:.3} MB in {:.1} s",
        report.size_mb(),
        tic.elapsed().as_secs_f64()
    );
    Ok(report)
}

/// Read access to a written archive.
pub struct ArchiveReader {
    zip: ZipArchive<File>,
}

impl ArchiveReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        require_file(path)?;
        Ok(ArchiveReader {
            zip: ZipArchive::new(File::open(path)?)?,
        })
    }

    pub fn manifest(&mut self) -> Result<Value> {
        let entry = self.zip.by_name(MANIFEST_NAME)?;
        Ok(serde_json::from_reader(entry)?)
    }

    pub fn array<A, D>(&mut self, name: &str) -> Result<ndarray::Array<A, D>>
    where
        A: ReadableElement,
        D: Dimension,
    {
        let entry = self.zip.by_name(name)?;
        Ok(ndarray::Array::<A, D>::read_npy(entry)?)
    }

    pub fn entry_names(&self) -> Vec<String> {
        self.zip.file_names().map(str::to_string).collect()
    }
}
