//! FFI bindings for Synheart Drift
//!
//! This module provides C-compatible functions for calling Drift from other
//! languages. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using
//! `drift_free_string`. Timestamps cross the boundary as milliseconds since
//! the Unix epoch (UTC).

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, Utc};

use crate::config::DriftConfig;
use crate::encoder::DriftEncoder;
use crate::pipeline::DriftSession;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn timestamp_from_millis(epoch_ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
}

/// Opaque handle to a DriftSession and its encoder
pub struct DriftSessionHandle {
    session: DriftSession,
    encoder: DriftEncoder,
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Create a new session.
///
/// # Safety
/// - `config_json` may be NULL for the default configuration, otherwise it
///   must be a valid null-terminated C string holding a drift config JSON.
/// - Returns a pointer that must be freed with `drift_session_free`.
/// - Returns NULL on error; call `drift_last_error` for the message.
#[no_mangle]
pub unsafe extern "C" fn drift_session_new(
    config_json: *const c_char,
) -> *mut DriftSessionHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        DriftConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match DriftConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    match DriftSession::new(config) {
        Ok(session) => Box::into_raw(Box::new(DriftSessionHandle {
            session,
            encoder: DriftEncoder::new(),
        })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a session.
///
/// # Safety
/// - `session` must be a valid pointer returned by `drift_session_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn drift_session_free(session: *mut DriftSessionHandle) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

/// Reset a session to its cold state (full reset, no partial path).
///
/// # Safety
/// - `session` must be a valid pointer returned by `drift_session_new`.
#[no_mangle]
pub unsafe extern "C" fn drift_session_reset(session: *mut DriftSessionHandle) {
    if let Some(handle) = session.as_mut() {
        handle.session.reset();
    }
}

// ============================================================================
// Streaming API
// ============================================================================

/// Push one interval sample into the session buffer.
///
/// Returns 0 on success, -1 on error (out-of-range value or out-of-order
/// timestamp); call `drift_last_error` for the message.
///
/// # Safety
/// - `session` must be a valid pointer returned by `drift_session_new`.
#[no_mangle]
pub unsafe extern "C" fn drift_push_interval(
    session: *mut DriftSessionHandle,
    value_ms: u32,
    timestamp_epoch_ms: i64,
) -> i32 {
    clear_last_error();

    let handle = match session.as_mut() {
        Some(handle) => handle,
        None => {
            set_last_error("Null session pointer");
            return -1;
        }
    };
    let at = match timestamp_from_millis(timestamp_epoch_ms) {
        Some(at) => at,
        None => {
            set_last_error("Timestamp out of representable range");
            return -1;
        }
    };

    match handle.session.push_interval(value_ms, at) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Run one pipeline tick and return the envelope JSON.
///
/// `hr_context` is passthrough heart-rate context; pass `has_hr_context = 0`
/// when none is available.
///
/// # Safety
/// - `session` must be a valid pointer returned by `drift_session_new`.
/// - Returns a newly allocated string that must be freed with
///   `drift_free_string`.
/// - Returns NULL on error; call `drift_last_error` for the message.
#[no_mangle]
pub unsafe extern "C" fn drift_tick(
    session: *mut DriftSessionHandle,
    timestamp_epoch_ms: i64,
    hr_context: f64,
    has_hr_context: i32,
) -> *mut c_char {
    clear_last_error();

    let handle = match session.as_mut() {
        Some(handle) => handle,
        None => {
            set_last_error("Null session pointer");
            return ptr::null_mut();
        }
    };
    let now = match timestamp_from_millis(timestamp_epoch_ms) {
        Some(now) => now,
        None => {
            set_last_error("Timestamp out of representable range");
            return ptr::null_mut();
        }
    };
    let hr = if has_hr_context != 0 {
        Some(hr_context)
    } else {
        None
    };

    let session_id = handle.session.session_id().to_string();
    match handle.session.tick(now, hr) {
        Ok(record) => match handle.encoder.encode_to_json(&session_id, record) {
            Ok(json) => string_to_cstr(&json),
            Err(e) => {
                set_last_error(&e.to_string());
                ptr::null_mut()
            }
        },
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Configuration helpers
// ============================================================================

/// Return the default configuration as JSON.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with
///   `drift_free_string`.
#[no_mangle]
pub unsafe extern "C" fn drift_config_default_json() -> *mut c_char {
    clear_last_error();
    match DriftConfig::default().to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Error handling and memory
// ============================================================================

/// Get the last error message, or NULL if none.
///
/// # Safety
/// - The returned pointer is valid until the next FFI call on this thread.
/// - Do NOT free the returned pointer.
#[no_mangle]
pub unsafe extern "C" fn drift_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Free a string returned by any drift function.
///
/// # Safety
/// - `ptr` must be a pointer returned by a drift function, or NULL.
#[no_mangle]
pub unsafe extern "C" fn drift_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}
