use crate::domain::DataStatus;
use crate::error::KiraError;
use crate::soft;

pub use crate::soft::{ROW_COUNT_FIELD, SUPPLEMENTARY_FIELD};

const IDAT_MARKER: &str = "idat";
const NONE_SENTINEL: &str = "NONE";
const RED_CHANNEL_MARKER: &str = "Red";

/// Decides how measurement data for a sample can be acquired from its SOFT text.
///
/// Precedence: a pair of supplementary files whose first entry is an idat file wins;
/// a single non red-channel entry with a positive row count means the table is on the
/// card; anything else has no usable data.
pub fn classify(text: &str) -> Result<DataStatus, KiraError> {
    let supplementary = soft::field_values(text, SUPPLEMENTARY_FIELD);

    if supplementary.len() == 2 && supplementary[0].contains(IDAT_MARKER) {
        return Ok(DataStatus::IdatPair);
    }
    if supplementary.len() != 1 {
        return Ok(DataStatus::None);
    }

    let entry = &supplementary[0];
    let single_channel = entry == NONE_SENTINEL || !entry.contains(RED_CHANNEL_MARKER);
    let row_count = declared_row_count(text)?;
    match row_count {
        Some(count) if single_channel && count > 0 => Ok(DataStatus::OnPage),
        _ => Ok(DataStatus::None),
    }
}

/// The declared row count; `Ok(None)` when the field is present but not a number.
pub fn declared_row_count(text: &str) -> Result<Option<u64>, KiraError> {
    let value = soft::field_values(text, ROW_COUNT_FIELD)
        .into_iter()
        .next()
        .ok_or_else(|| KiraError::Parse(format!("{ROW_COUNT_FIELD} not found")))?;
    Ok(value.parse::<u64>().ok())
}
