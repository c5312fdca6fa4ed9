//! Copy OUT parameter values back into caller slots after execution.

use crate::bind::BindList;
use crate::connection::Connection;
use crate::decode::{decode_c_string, decode_f64, decode_i64, decode_u64};
use crate::error::Result;
use crate::native::constants::OCI_IND_NULL;
use crate::native::NativeStorage;
use crate::types::Output;

/// Write every OUT bind that owns a buffer back into its slot.
///
/// Binds without native memory (NULL or unsupported destinations) are
/// left untouched.
pub(crate) fn write_back(conn: &Connection, binds: &BindList) -> Result<()> {
    let api = conn.api();
    for (index, param) in binds.params().iter().enumerate() {
        let Some(out) = &param.out else {
            continue;
        };
        let NativeStorage::Buffer(buf) = param.storage else {
            continue;
        };
        let data = api
            .buffer_read(buf, param.size as usize)
            .map_err(|rc| conn.error(rc))?;

        match out {
            Output::Str { slot, .. } => {
                let ind = api.bind_indicator(param.handle).map_err(|rc| conn.error(rc))?;
                if ind == OCI_IND_NULL {
                    slot.set(String::new());
                } else {
                    slot.set(decode_c_string(&data));
                }
            }
            Output::I8(slot) => slot.set(decode_i64(&data, index)? as i8),
            Output::I16(slot) => slot.set(decode_i64(&data, index)? as i16),
            Output::I32(slot) => slot.set(decode_i64(&data, index)? as i32),
            Output::I64(slot) => slot.set(decode_i64(&data, index)?),
            Output::Isize(slot) => slot.set(decode_i64(&data, index)? as isize),
            Output::U8(slot) => slot.set(decode_u64(&data, index)? as u8),
            Output::U16(slot) => slot.set(decode_u64(&data, index)? as u16),
            Output::U32(slot) => slot.set(decode_u64(&data, index)? as u32),
            Output::U64(slot) => slot.set(decode_u64(&data, index)?),
            Output::Usize(slot) => slot.set(decode_u64(&data, index)? as usize),
            Output::F32(slot) => slot.set(decode_f64(&data, index)? as f32),
            Output::F64(slot) => slot.set(decode_f64(&data, index)?),
            Output::Bool(slot) => slot.set(data.first().is_some_and(|&b| b != 0)),
            Output::Other(_) => {}
        }
    }
    Ok(())
}
