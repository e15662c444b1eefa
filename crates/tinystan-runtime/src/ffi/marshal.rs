//! Marshaling between Rust values and foreign buffers
//!
//! - `encode_text` / `decode_text`: null-terminated strings
//! - `encode_multi` / `encode_inits`: several JSON records in one string,
//!   joined by the module's separator byte
//! - `reshape` and the metric variants: flat output buffers to matrices
//!
//! # Memory Safety
//!
//! Encoders allocate through a `ForeignArena`, so the caller never holds
//! an unowned foreign buffer.

use crate::error::{StanError, StanResult};
use crate::ffi::module::ForeignModule;
use crate::ffi::safety::ForeignArena;
use crate::ffi::types::CStrPtr;
use tinystan_config::Inits;

/// Copy `s` into fresh foreign memory as a null-terminated string
pub fn encode_text<M: ForeignModule + ?Sized>(
    arena: &mut ForeignArena<'_, M>,
    s: &str,
) -> StanResult<CStrPtr> {
    encode_bytes(arena, s.as_bytes())
}

fn encode_bytes<M: ForeignModule + ?Sized>(
    arena: &mut ForeignArena<'_, M>,
    bytes: &[u8],
) -> StanResult<CStrPtr> {
    if let Some(offset) = bytes.iter().position(|b| *b == 0) {
        return Err(StanError::InteriorNul(offset));
    }

    let ptr = arena.acquire(bytes.len() + 1)?;
    let mut terminated = Vec::with_capacity(bytes.len() + 1);
    terminated.extend_from_slice(bytes);
    terminated.push(0);

    // SAFETY: `ptr` was just allocated with room for the bytes plus terminator.
    unsafe { arena.module().write_bytes(ptr, &terminated) };
    Ok(ptr.as_cstr())
}

/// Read a foreign null-terminated string
///
/// Invalid UTF-8 is replaced rather than rejected; a null pointer reads as
/// the empty string.
///
/// # Safety
///
/// A non-null `s` must point to a live null-terminated sequence.
pub unsafe fn decode_text<M: ForeignModule + ?Sized>(module: &M, s: CStrPtr) -> String {
    if s.is_null() {
        return String::new();
    }
    let bytes = module.read_cstr(s);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Join several serialized records with `separator` into one foreign string
pub fn encode_multi<M: ForeignModule + ?Sized>(
    arena: &mut ForeignArena<'_, M>,
    values: &[String],
    separator: u8,
) -> StanResult<CStrPtr> {
    let mut joined = Vec::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            joined.push(separator);
        }
        joined.extend_from_slice(value.as_bytes());
    }
    encode_bytes(arena, &joined)
}

/// Encode initial values; `None` becomes the null string
pub fn encode_inits<M: ForeignModule + ?Sized>(
    arena: &mut ForeignArena<'_, M>,
    inits: Option<&Inits>,
    separator: u8,
) -> StanResult<CStrPtr> {
    match inits {
        None => Ok(CStrPtr::NULL),
        Some(Inits::Shared(value)) => encode_text(arena, &json_text(value)?),
        Some(Inits::PerChain(values)) => {
            let texts = values
                .iter()
                .map(json_text)
                .collect::<StanResult<Vec<_>>>()?;
            encode_multi(arena, &texts, separator)
        }
    }
}

/// JSON text of a value; a string value is taken as already serialized
pub fn json_text(value: &serde_json::Value) -> StanResult<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string(other).map_err(|source| StanError::Serialize {
            what: "initial values",
            source,
        }),
    }
}

/// Split the model's comma-separated parameter names
pub fn split_param_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Turn an interleaved draw buffer into one row per variable
///
/// Variable `j` of draw `i` lives at `i * n_vars + j`.
///
/// # Panics
///
/// If `flat.len() != n_vars * n_draws`; the sizes are computed before the
/// foreign call, so a mismatch is a bug in the caller.
pub fn reshape(flat: &[f64], n_vars: usize, n_draws: usize) -> Vec<Vec<f64>> {
    assert_eq!(
        flat.len(),
        n_vars * n_draws,
        "buffer holds {} values, expected {} variables x {} draws",
        flat.len(),
        n_vars,
        n_draws
    );

    let mut rows = vec![Vec::with_capacity(n_draws); n_vars];
    for draw in flat.chunks_exact(n_vars.max(1)).take(n_draws) {
        for (row, value) in rows.iter_mut().zip(draw) {
            row.push(*value);
        }
    }
    rows
}

/// One `n_params x n_params` matrix per chain, row-major within a chain
///
/// # Panics
///
/// If `flat.len() != n_chains * n_params * n_params`.
pub fn reshape_dense_metric(flat: &[f64], n_chains: usize, n_params: usize) -> Vec<Vec<Vec<f64>>> {
    assert_eq!(flat.len(), n_chains * n_params * n_params);
    if n_params == 0 {
        return vec![Vec::new(); n_chains];
    }
    flat.chunks_exact(n_params * n_params)
        .map(|block| block.chunks_exact(n_params).map(<[f64]>::to_vec).collect())
        .collect()
}

/// One `n_params` vector per chain
///
/// # Panics
///
/// If `flat.len() != n_chains * n_params`.
pub fn reshape_diag_metric(flat: &[f64], n_chains: usize, n_params: usize) -> Vec<Vec<f64>> {
    assert_eq!(flat.len(), n_chains * n_params);
    if n_params == 0 {
        return vec![Vec::new(); n_chains];
    }
    flat.chunks_exact(n_params).map(<[f64]>::to_vec).collect()
}
