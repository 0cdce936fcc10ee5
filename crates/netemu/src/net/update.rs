use std::collections::BTreeMap;

use crate::interpolation::UpdateInfo;

use super::protocol::NetData;
use super::stream::{NetReader, NetWriter, StreamError};

const ENTRY_LEN: usize = 2 + 8;

/// Keyed numeric attributes. Continuous values are interpolated on the
/// receiving side, discrete ones are applied as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateMessage {
    pub continuous_values: BTreeMap<u16, f64>,
    pub discrete_values: BTreeMap<u16, f64>,
}

impl UpdateMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_continuous(mut self, key: u16, value: f64) -> Self {
        self.continuous_values.insert(key, value);
        self
    }

    pub fn with_discrete(mut self, key: u16, value: f64) -> Self {
        self.discrete_values.insert(key, value);
        self
    }

    pub fn into_info(self, time: f64) -> UpdateInfo {
        UpdateInfo::new(time, self.continuous_values, self.discrete_values)
    }
}

impl From<&UpdateInfo> for UpdateMessage {
    fn from(info: &UpdateInfo) -> Self {
        Self {
            continuous_values: info.continuous_values.clone(),
            discrete_values: info.discrete_values.clone(),
        }
    }
}

fn count_prefix(map: &BTreeMap<u16, f64>) -> Result<u16, StreamError> {
    u16::try_from(map.len()).map_err(|_| StreamError::LengthOverflow { len: map.len() })
}

fn read_entries(
    reader: &mut NetReader<'_>,
    count: u16,
    into: &mut BTreeMap<u16, f64>,
) -> Result<(), StreamError> {
    for _ in 0..count {
        let key = reader.read_u16()?;
        let value = reader.read_float()?;
        into.insert(key, value);
    }
    Ok(())
}

fn write_entries(writer: &mut NetWriter, map: &BTreeMap<u16, f64>) -> Result<(), StreamError> {
    for (key, value) in map {
        writer.write_u16(*key)?;
        writer.write_float(*value)?;
    }
    Ok(())
}

impl NetData for UpdateMessage {
    fn load_from_stream(&mut self, reader: &mut NetReader<'_>) -> Result<(), StreamError> {
        let continuous = reader.read_u16()?;
        let discrete = reader.read_u16()?;
        read_entries(reader, continuous, &mut self.continuous_values)?;
        read_entries(reader, discrete, &mut self.discrete_values)
    }

    fn save_to_stream(&self, writer: &mut NetWriter) -> Result<(), StreamError> {
        writer.write_u16(count_prefix(&self.continuous_values)?)?;
        writer.write_u16(count_prefix(&self.discrete_values)?)?;
        write_entries(writer, &self.continuous_values)?;
        write_entries(writer, &self.discrete_values)
    }

    fn data_length(&self) -> usize {
        4 + (self.continuous_values.len() + self.discrete_values.len()) * ENTRY_LEN
    }
}
