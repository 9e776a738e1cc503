//! Haptic pattern documents and their JSON representation.
//!
//! The persisted layout is:
//!
//! ```json
//! {
//!     "Version": 1.0,
//!     "Metadata": { "Project": "", "CreationDate": "", "Description": "", "Author": "" },
//!     "Events": [
//!         { "Event": { "Timestamp": 0.5, "Type": "HapticTransient",
//!                      "Parameters": [{ "ID": "Intensity", "Value": 0.4 }, ...] } },
//!         { "ControlCurve": { "ParameterID": "...", "StartTime": 0.0,
//!                             "ControlPoints": [{ "Time": 0.0, "ParameterValue": 1.0 }] } }
//!     ]
//! }
//! ```
//!
//! The older layout keyed on `Pattern` (with `Time`, `EventType`,
//! `EventParameters`, ...) is not accepted.

use std::{
    cell::Cell,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    config::DocumentConfig,
    haptics::{ControlCurve, ControlPoint, HapticEvent},
    HapticError, Result,
};

/// Schema version written into every document.
pub const SCHEMA_VERSION: f64 = 1.0;

/// Extension used for persisted patterns.
pub const PATTERN_EXTENSION: &str = "ahap";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatternMetadata {
    pub project: String,
    pub creation_date: String,
    pub description: String,
    pub author: String,
}

impl PatternMetadata {
    /// Metadata stamped with the current local time.
    pub fn new(
        project: impl Into<String>,
        description: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            creation_date: chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string(),
            description: description.into(),
            author: author.into(),
        }
    }

    pub fn from_config(config: &DocumentConfig) -> Self {
        Self::new(&config.project, &config.description, &config.author)
    }
}

/// Ordered list of haptic events plus metadata.
///
/// Entries keep insertion order. Intensity, sharpness, volume and control
/// point values are clamped into `[0, 1]`; timestamps and durations are
/// validated and a rejected append leaves the document untouched.
///
/// A document counts as finalized once it has been serialized or
/// persisted. Appending afterwards still works but is logged.
#[derive(Debug, Clone)]
pub struct HapticPatternDocument {
    metadata: PatternMetadata,
    events: Vec<HapticEvent>,
    finalized: Cell<bool>,
}

impl HapticPatternDocument {
    pub fn new(metadata: PatternMetadata) -> Self {
        Self {
            metadata,
            events: Vec::new(),
            finalized: Cell::new(false),
        }
    }

    pub fn version(&self) -> f64 {
        SCHEMA_VERSION
    }

    pub fn metadata(&self) -> &PatternMetadata {
        &self.metadata
    }

    pub fn events(&self) -> &[HapticEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn transient_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, HapticEvent::Transient { .. }))
            .count()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    pub fn append_transient(&mut self, timestamp: f64, intensity: f64, sharpness: f64) -> Result<()> {
        let timestamp = check_timestamp(timestamp)?;
        self.push(HapticEvent::Transient {
            timestamp,
            intensity: unit(intensity),
            sharpness: unit(sharpness),
        });
        Ok(())
    }

    pub fn append_continuous(
        &mut self,
        timestamp: f64,
        duration: f64,
        intensity: f64,
        sharpness: f64,
    ) -> Result<()> {
        let timestamp = check_timestamp(timestamp)?;
        let duration = check_duration(duration)?;
        self.push(HapticEvent::Continuous {
            timestamp,
            duration,
            intensity: unit(intensity),
            sharpness: unit(sharpness),
        });
        Ok(())
    }

    pub fn append_audio_custom(
        &mut self,
        timestamp: f64,
        waveform: impl Into<String>,
        volume: f64,
    ) -> Result<()> {
        let timestamp = check_timestamp(timestamp)?;
        self.push(HapticEvent::AudioCustom {
            timestamp,
            waveform: waveform.into(),
            volume: unit(volume),
        });
        Ok(())
    }

    pub fn append_control_curve(
        &mut self,
        parameter_id: impl Into<String>,
        start_time: f64,
        points: Vec<ControlPoint>,
    ) -> Result<()> {
        let start_time = check_timestamp(start_time)?;
        let points = points
            .into_iter()
            .map(|point| Ok(ControlPoint::new(check_timestamp(point.time)?, unit(point.value))))
            .collect::<Result<Vec<_>>>()?;
        self.push(HapticEvent::ControlCurve(ControlCurve {
            parameter_id: parameter_id.into(),
            start_time,
            points,
        }));
        Ok(())
    }

    /// Appends any event through the matching `append_*` method.
    pub fn append(&mut self, event: HapticEvent) -> Result<()> {
        match event {
            HapticEvent::Transient {
                timestamp,
                intensity,
                sharpness,
            } => self.append_transient(timestamp, intensity, sharpness),
            HapticEvent::Continuous {
                timestamp,
                duration,
                intensity,
                sharpness,
            } => self.append_continuous(timestamp, duration, intensity, sharpness),
            HapticEvent::AudioCustom {
                timestamp,
                waveform,
                volume,
            } => self.append_audio_custom(timestamp, waveform, volume),
            HapticEvent::ControlCurve(curve) => {
                self.append_control_curve(curve.parameter_id, curve.start_time, curve.points)
            }
        }
    }

    /// Appends events in order, stopping at the first invalid one. Events
    /// before it stay in the document.
    pub fn extend(&mut self, events: impl IntoIterator<Item = HapticEvent>) -> Result<()> {
        events.into_iter().try_for_each(|event| self.append(event))
    }

    /// Encodes the document as pretty-printed JSON (4-space indent).
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let wire = WireDocument::from(self);
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        wire.serialize(&mut serializer)?;
        self.finalized.set(true);
        Ok(out)
    }

    pub fn to_pretty_string(&self) -> Result<String> {
        let bytes = self.serialize()?;
        String::from_utf8(bytes).map_err(|e| HapticError::msg(e.to_string()))
    }

    /// Parses a document. Everything passes through the same validation as
    /// the `append_*` methods.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let wire: WireDocument = serde_json::from_slice(bytes)
            .map_err(|e| HapticError::InvalidDocument(e.to_string()))?;

        if wire.version != SCHEMA_VERSION {
            return Err(HapticError::InvalidDocument(format!(
                "unsupported version {}",
                wire.version
            )));
        }

        let mut document = Self::new(wire.metadata);
        for entry in wire.events {
            document.append(entry.try_into()?)?;
        }
        Ok(document)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Writes the serialized document to `path`.
    ///
    /// The bytes go to a hidden sibling file first and are renamed into
    /// place, so a failure never leaves a partial document at `path`.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.serialize()?;
        let staging = staging_path(path);

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&staging)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&staging, path)
        };

        if let Err(err) = write() {
            let _ = fs::remove_file(&staging);
            return Err(HapticError::io_write(path, err));
        }

        tracing::info!(?path, events = self.events.len(), "persisted haptic pattern");
        Ok(())
    }

    fn push(&mut self, event: HapticEvent) {
        if self.finalized.get() {
            tracing::warn!("appending to a haptic pattern that was already serialized");
        }
        self.events.push(event);
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| PATTERN_EXTENSION.to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

fn check_timestamp(timestamp: f64) -> Result<f64> {
    if timestamp.is_finite() && timestamp >= 0.0 {
        Ok(timestamp)
    } else {
        Err(HapticError::InvalidTimestamp(timestamp))
    }
}

fn check_duration(duration: f64) -> Result<f64> {
    if duration.is_finite() && duration > 0.0 {
        Ok(duration)
    } else {
        Err(HapticError::InvalidDuration(duration))
    }
}

/// Clamps into `[0, 1]`; NaN becomes 0.
fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireDocument {
    #[serde(rename = "Version")]
    version: f64,
    #[serde(rename = "Metadata")]
    metadata: PatternMetadata,
    #[serde(rename = "Events")]
    events: Vec<WireEntry>,
}

impl From<&HapticPatternDocument> for WireDocument {
    fn from(document: &HapticPatternDocument) -> Self {
        Self {
            version: SCHEMA_VERSION,
            metadata: document.metadata.clone(),
            events: document.events.iter().map(WireEntry::from).collect(),
        }
    }
}

#[derive(Serialize, Deserialize)]
enum WireEntry {
    Event(WireEvent),
    ControlCurve(WireCurve),
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
enum EventType {
    HapticTransient,
    HapticContinuous,
    AudioCustom,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
enum ParameterId {
    Intensity,
    Sharpness,
    Volume,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireParameter {
    #[serde(rename = "ID")]
    id: ParameterId,
    #[serde(rename = "Value")]
    value: f64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
struct WireEvent {
    timestamp: f64,
    #[serde(rename = "Type")]
    event_type: EventType,
    parameters: Vec<WireParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    waveform: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
struct WireCurve {
    #[serde(rename = "ParameterID")]
    parameter_id: String,
    start_time: f64,
    control_points: Vec<ControlPoint>,
}

fn parameter(id: ParameterId, value: f64) -> WireParameter {
    WireParameter { id, value }
}

impl From<&HapticEvent> for WireEntry {
    fn from(event: &HapticEvent) -> Self {
        let wire = |timestamp, event_type, parameters, duration, waveform| {
            WireEntry::Event(WireEvent {
                timestamp,
                event_type,
                parameters,
                duration,
                waveform,
            })
        };

        match event {
            HapticEvent::Transient {
                timestamp,
                intensity,
                sharpness,
            } => wire(
                *timestamp,
                EventType::HapticTransient,
                vec![
                    parameter(ParameterId::Intensity, *intensity),
                    parameter(ParameterId::Sharpness, *sharpness),
                ],
                None,
                None,
            ),
            HapticEvent::Continuous {
                timestamp,
                duration,
                intensity,
                sharpness,
            } => wire(
                *timestamp,
                EventType::HapticContinuous,
                vec![
                    parameter(ParameterId::Intensity, *intensity),
                    parameter(ParameterId::Sharpness, *sharpness),
                ],
                Some(*duration),
                None,
            ),
            HapticEvent::AudioCustom {
                timestamp,
                waveform,
                volume,
            } => wire(
                *timestamp,
                EventType::AudioCustom,
                vec![parameter(ParameterId::Volume, *volume)],
                None,
                Some(waveform.clone()),
            ),
            HapticEvent::ControlCurve(curve) => WireEntry::ControlCurve(WireCurve {
                parameter_id: curve.parameter_id.clone(),
                start_time: curve.start_time,
                control_points: curve.points.clone(),
            }),
        }
    }
}

impl TryFrom<WireEntry> for HapticEvent {
    type Error = HapticError;

    fn try_from(entry: WireEntry) -> Result<Self> {
        let event = match entry {
            WireEntry::ControlCurve(curve) => {
                return Ok(HapticEvent::ControlCurve(ControlCurve {
                    parameter_id: curve.parameter_id,
                    start_time: curve.start_time,
                    points: curve.control_points,
                }))
            }
            WireEntry::Event(event) => event,
        };

        let mut params = ParameterSet::collect(event.event_type, &event.parameters)?;
        let parsed = match event.event_type {
            EventType::HapticTransient => {
                reject_extra(event.event_type, "Duration", event.duration.is_some())?;
                reject_extra(event.event_type, "Waveform", event.waveform.is_some())?;
                HapticEvent::Transient {
                    timestamp: event.timestamp,
                    intensity: params.take(ParameterId::Intensity)?,
                    sharpness: params.take(ParameterId::Sharpness)?,
                }
            }
            EventType::HapticContinuous => {
                reject_extra(event.event_type, "Waveform", event.waveform.is_some())?;
                HapticEvent::Continuous {
                    timestamp: event.timestamp,
                    duration: event.duration.ok_or_else(|| {
                        HapticError::InvalidDocument("HapticContinuous without Duration".into())
                    })?,
                    intensity: params.take(ParameterId::Intensity)?,
                    sharpness: params.take(ParameterId::Sharpness)?,
                }
            }
            EventType::AudioCustom => {
                reject_extra(event.event_type, "Duration", event.duration.is_some())?;
                HapticEvent::AudioCustom {
                    timestamp: event.timestamp,
                    waveform: event.waveform.ok_or_else(|| {
                        HapticError::InvalidDocument("AudioCustom without Waveform".into())
                    })?,
                    volume: params.take(ParameterId::Volume)?,
                }
            }
        };
        params.finish()?;
        Ok(parsed)
    }
}

fn reject_extra(event_type: EventType, field: &str, present: bool) -> Result<()> {
    if present {
        Err(HapticError::InvalidDocument(format!(
            "{event_type:?} does not take a {field}"
        )))
    } else {
        Ok(())
    }
}

/// Parameters of one event, each allowed at most once.
struct ParameterSet {
    event_type: EventType,
    values: Vec<(ParameterId, f64)>,
}

impl ParameterSet {
    fn collect(event_type: EventType, parameters: &[WireParameter]) -> Result<Self> {
        let mut values: Vec<(ParameterId, f64)> = Vec::with_capacity(parameters.len());
        for param in parameters {
            if values.iter().any(|(id, _)| *id == param.id) {
                return Err(HapticError::InvalidDocument(format!(
                    "{event_type:?} repeats parameter {:?}",
                    param.id
                )));
            }
            values.push((param.id, param.value));
        }
        Ok(Self { event_type, values })
    }

    fn take(&mut self, id: ParameterId) -> Result<f64> {
        let index = self
            .values
            .iter()
            .position(|(candidate, _)| *candidate == id)
            .ok_or_else(|| {
                HapticError::InvalidDocument(format!("{:?} is missing {id:?}", self.event_type))
            })?;
        Ok(self.values.remove(index).1)
    }

    fn finish(self) -> Result<()> {
        match self.values.first() {
            Some((id, _)) => Err(HapticError::InvalidDocument(format!(
                "{:?} does not take {id:?}",
                self.event_type
            ))),
            None => Ok(()),
        }
    }
}
