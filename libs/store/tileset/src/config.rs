// This file is part of Regolith.
//
// Regolith is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Regolith is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Regolith.  If not, see <http://www.gnu.org/licenses/>.
use json::JsonValue;
use tiling::{Error, LodRange, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PositionKind {
    Objective,
    Subjective,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HeightMode {
    Fixed,
    Floating,
}

/// The default view position stored with a tile set.
#[derive(Clone, Debug, PartialEq)]
pub struct Position {
    pub kind: PositionKind,
    pub height_mode: HeightMode,
    pub position: [f64; 3],
    pub orientation: [f64; 3],
    pub vertical_extent: f64,
    pub vertical_fov: f64,
}

/// The UTF-8 tile-set configuration: identity, reference frame, lod range,
/// optional view position, credits, bound layers, and opaque per-driver
/// options.
#[derive(Clone, Debug, PartialEq)]
pub struct TileSetConfig {
    pub id: String,
    pub reference_frame: String,
    pub lod_range: LodRange,
    pub position: Option<Position>,
    pub credits: Vec<u16>,
    pub bound_layers: Vec<u16>,
    pub driver_options: Option<JsonValue>,
}

impl TileSetConfig {
    pub fn new(id: &str, reference_frame: &str) -> Self {
        Self {
            id: id.to_owned(),
            reference_frame: reference_frame.to_owned(),
            lod_range: LodRange::empty(),
            position: None,
            credits: Vec::new(),
            bound_layers: Vec::new(),
            driver_options: None,
        }
    }

    /// The externally served form: per-driver options removed.
    pub fn stripped(&self) -> TileSetConfig {
        let mut out = self.clone();
        out.driver_options = None;
        out
    }

    pub fn to_json(&self) -> JsonValue {
        let mut obj = JsonValue::new_object();
        obj["id"] = self.id.clone().into();
        obj["referenceFrame"] = self.reference_frame.clone().into();
        obj["lodRange"] = match (self.lod_range.min(), self.lod_range.max()) {
            (Some(min), Some(max)) => {
                let mut range = JsonValue::new_array();
                range.push(min).ok();
                range.push(max).ok();
                range
            }
            _ => JsonValue::Null,
        };
        if let Some(position) = &self.position {
            let mut pos = JsonValue::new_object();
            pos["type"] = match position.kind {
                PositionKind::Objective => "objective",
                PositionKind::Subjective => "subjective",
            }
            .into();
            pos["heightMode"] = match position.height_mode {
                HeightMode::Fixed => "fixed",
                HeightMode::Floating => "floating",
            }
            .into();
            let mut coords = JsonValue::new_array();
            for v in position.position {
                coords.push(v).ok();
            }
            pos["position"] = coords;
            let mut orientation = JsonValue::new_array();
            for v in position.orientation {
                orientation.push(v).ok();
            }
            pos["orientation"] = orientation;
            pos["verticalExtent"] = position.vertical_extent.into();
            pos["verticalFov"] = position.vertical_fov.into();
            obj["position"] = pos;
        }
        let mut credits = JsonValue::new_array();
        for &credit in &self.credits {
            credits.push(credit).ok();
        }
        obj["credits"] = credits;
        let mut layers = JsonValue::new_array();
        for &layer in &self.bound_layers {
            layers.push(layer).ok();
        }
        obj["boundLayers"] = layers;
        if let Some(options) = &self.driver_options {
            obj["driverOptions"] = options.clone();
        }
        obj
    }

    pub fn from_json(value: &JsonValue) -> Result<TileSetConfig> {
        let id = value["id"]
            .as_str()
            .ok_or_else(|| Error::format("config lacks an id"))?
            .to_owned();
        let reference_frame = value["referenceFrame"]
            .as_str()
            .ok_or_else(|| Error::format("config lacks a referenceFrame"))?
            .to_owned();
        let lod_range = if value["lodRange"].is_null() {
            LodRange::empty()
        } else {
            let min = value["lodRange"][0]
                .as_u8()
                .ok_or_else(|| Error::format("config lodRange minimum unreadable"))?;
            let max = value["lodRange"][1]
                .as_u8()
                .ok_or_else(|| Error::format("config lodRange maximum unreadable"))?;
            if min > max {
                return Err(Error::format("config lodRange inverted"));
            }
            LodRange::of(min, max)
        };
        let position = if value["position"].is_null() {
            None
        } else {
            let pos = &value["position"];
            let kind = match pos["type"].as_str() {
                Some("objective") => PositionKind::Objective,
                Some("subjective") => PositionKind::Subjective,
                _ => return Err(Error::format("config position type unreadable")),
            };
            let height_mode = match pos["heightMode"].as_str() {
                Some("fixed") => HeightMode::Fixed,
                Some("floating") => HeightMode::Floating,
                _ => return Err(Error::format("config position heightMode unreadable")),
            };
            let triple = |key: &str| -> Result<[f64; 3]> {
                let mut out = [0f64; 3];
                for (i, slot) in out.iter_mut().enumerate() {
                    *slot = pos[key][i].as_f64().ok_or_else(|| {
                        Error::format(format!("config position {} unreadable", key))
                    })?;
                }
                Ok(out)
            };
            Some(Position {
                kind,
                height_mode,
                position: triple("position")?,
                orientation: triple("orientation")?,
                vertical_extent: pos["verticalExtent"].as_f64().unwrap_or(0.),
                vertical_fov: pos["verticalFov"].as_f64().unwrap_or(0.),
            })
        };
        let mut credits = Vec::new();
        for member in value["credits"].members() {
            credits.push(
                member
                    .as_u16()
                    .ok_or_else(|| Error::format("config credit id unreadable"))?,
            );
        }
        let mut bound_layers = Vec::new();
        for member in value["boundLayers"].members() {
            bound_layers.push(
                member
                    .as_u16()
                    .ok_or_else(|| Error::format("config bound layer id unreadable"))?,
            );
        }
        let driver_options = if value["driverOptions"].is_null() {
            None
        } else {
            Some(value["driverOptions"].clone())
        };
        Ok(TileSetConfig {
            id,
            reference_frame,
            lod_range,
            position,
            credits,
            bound_layers,
            driver_options,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.to_json().pretty(2).into_bytes()
    }

    pub fn deserialize(data: &[u8]) -> Result<TileSetConfig> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::format("config is not valid utf-8"))?;
        let value = json::parse(text)
            .map_err(|e| Error::format(format!("config does not parse: {}", e)))?;
        Self::from_json(&value)
    }
}
