// ============================================================================
// AI BACKEND: ONNX Runtime inference for the colorization network
// ============================================================================
//
// Uses `libloading` to dynamically load onnxruntime.dll / libonnxruntime.so
// at runtime so the binary has NO compile-time dependency on ONNX Runtime.
// The runtime path comes from settings (`onnx_runtime_path`) or the CLI.
//
// Three resources make up the model:
//   colorization.onnx       network topology
//   colorization.onnx.data  trained weights (external data of the graph)
//   pts_in_hull.npy         313×2 table of quantized ab anchor points

#![allow(unsafe_op_in_unsafe_fn)]
#![allow(unused_unsafe)]

use std::ffi::{CStr, CString, c_char, c_void};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::ops::colorize::{AbPlane, ColorizationModel};

pub const TOPOLOGY_FILE: &str = "colorization.onnx";
pub const WEIGHTS_FILE: &str = "colorization.onnx.data";
pub const ANCHORS_FILE: &str = "pts_in_hull.npy";

/// Number of quantized ab bins the network classifies over.
pub const ANCHOR_COUNT: usize = 313;
/// Temperature applied to the class logits before the softmax (annealed mean).
pub const ANNEAL_SCALE: f32 = 2.606;
/// Network input resolution when the graph leaves it dynamic.
const DEFAULT_INPUT_SIZE: u32 = 224;

/// Errors that can occur while loading or running the colorization model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model resource not found: {}", .0.display())]
    ResourceMissing(PathBuf),
    #[error("ONNX Runtime library path is not configured")]
    RuntimeNotConfigured,
    #[error("ONNX Runtime library not found: {0}")]
    RuntimeNotFound(String),
    #[error("failed to load ONNX Runtime library: {0}")]
    RuntimeLoadFailed(String),
    #[error("ONNX Runtime API init failed: {0}")]
    ApiInitFailed(String),
    #[error("failed to create ONNX session: {0}")]
    SessionCreateFailed(String),
    #[error("malformed anchor table: {0}")]
    InvalidAnchors(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid model output: {0}")]
    InvalidOutput(String),
}

// ============================================================================
// MODEL RESOURCES
// ============================================================================

/// Absolute paths of the three model files inside a model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResources {
    pub topology: PathBuf,
    pub weights: PathBuf,
    pub anchors: PathBuf,
}

impl ModelResources {
    /// Locate all three resources in `dir`. The first missing file is reported.
    pub fn discover(dir: &Path) -> Result<Self, ModelError> {
        let find = |name: &str| {
            let p = dir.join(name);
            if p.is_file() {
                // canonical paths are absolute and free of `..`
                std::fs::canonicalize(&p).map_err(|_| ModelError::ResourceMissing(p))
            } else {
                Err(ModelError::ResourceMissing(p))
            }
        };
        Ok(Self {
            topology: find(TOPOLOGY_FILE)?,
            weights: find(WEIGHTS_FILE)?,
            anchors: find(ANCHORS_FILE)?,
        })
    }
}

// ============================================================================
// ANCHOR TABLE (.npy)
// ============================================================================

/// The 313 ab cluster centres, row-major `[a, b]` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorTable(Vec<[f32; 2]>);

impl AnchorTable {
    pub fn new(points: Vec<[f32; 2]>) -> Result<Self, ModelError> {
        if points.len() != ANCHOR_COUNT {
            return Err(ModelError::InvalidAnchors(format!(
                "expected {} points, found {}",
                ANCHOR_COUNT,
                points.len()
            )));
        }
        Ok(Self(points))
    }

    pub fn points(&self) -> &[[f32; 2]] {
        &self.0
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = std::fs::read(path)
            .map_err(|e| ModelError::InvalidAnchors(format!("{}: {}", path.display(), e)))?;
        parse_npy_anchors(&bytes)
    }
}

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Parse a NumPy `.npy` file holding a `(313, 2)` numeric array.
/// Accepts little-endian f4/f8/i4/i8 element types in either memory order.
pub fn parse_npy_anchors(bytes: &[u8]) -> Result<AnchorTable, ModelError> {
    let bad = |msg: &str| ModelError::InvalidAnchors(msg.to_string());
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(bad("missing .npy magic"));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(bad("truncated header"));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        v => return Err(ModelError::InvalidAnchors(format!("unsupported .npy version {v}"))),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| bad("truncated header"))?;
    let header = std::str::from_utf8(header).map_err(|_| bad("header is not text"))?;

    let descr = header_value(header, "descr")
        .map(|v| v.trim_matches(|c| c == '\'' || c == '"').to_string())
        .ok_or_else(|| bad("header has no descr"))?;
    let fortran = header_value(header, "fortran_order")
        .map(|v| v.starts_with("True"))
        .unwrap_or(false);
    let shape = header_value(header, "shape").ok_or_else(|| bad("header has no shape"))?;
    let dims: Vec<usize> = shape
        .trim_start_matches('(')
        .split([',', ')'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|_| bad("shape is not numeric"))?;
    if dims != [ANCHOR_COUNT, 2] {
        return Err(ModelError::InvalidAnchors(format!(
            "expected shape ({}, 2), found {:?}",
            ANCHOR_COUNT, dims
        )));
    }

    let (width, read) = match descr.as_str() {
        "<f8" => (8, read_f8 as ReadSample),
        "<f4" => (4, read_f4 as ReadSample),
        "<i8" => (8, read_i8 as ReadSample),
        "<i4" => (4, read_i4 as ReadSample),
        other => {
            return Err(ModelError::InvalidAnchors(format!(
                "unsupported element type '{other}'"
            )));
        }
    };
    let count = ANCHOR_COUNT * 2;
    let data = bytes
        .get(data_start..data_start + count * width)
        .ok_or_else(|| bad("truncated data"))?;
    let values: Vec<f32> = data.chunks_exact(width).map(read).collect();

    let points = (0..ANCHOR_COUNT)
        .map(|i| {
            if fortran {
                [values[i], values[ANCHOR_COUNT + i]]
            } else {
                [values[2 * i], values[2 * i + 1]]
            }
        })
        .collect();
    AnchorTable::new(points)
}

type ReadSample = fn(&[u8]) -> f32;

fn read_f8(b: &[u8]) -> f32 {
    f64::from_le_bytes(b.try_into().unwrap_or([0; 8])) as f32
}

fn read_f4(b: &[u8]) -> f32 {
    f32::from_le_bytes(b.try_into().unwrap_or([0; 4]))
}

fn read_i8(b: &[u8]) -> f32 {
    i64::from_le_bytes(b.try_into().unwrap_or([0; 8])) as f32
}

fn read_i4(b: &[u8]) -> f32 {
    i32::from_le_bytes(b.try_into().unwrap_or([0; 4])) as f32
}

/// Raw text of `'key': value` in a Python dict literal, up to the next
/// top-level comma.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pat_single = format!("'{key}'");
    let pat_double = format!("\"{key}\"");
    let pos = header
        .find(&pat_single)
        .map(|p| p + pat_single.len())
        .or_else(|| header.find(&pat_double).map(|p| p + pat_double.len()))?;
    let rest = header[pos..].trim_start().strip_prefix(':')?.trim_start();
    if rest.starts_with('(') {
        let end = rest.find(')')?;
        Some(&rest[..=end])
    } else {
        let end = rest.find([',', '}']).unwrap_or(rest.len());
        Some(rest[..end].trim())
    }
}

/// Decode a `[313, h*w]` logit volume into ab planes: softmax over the
/// temperature-scaled logits, then the probability-weighted anchor mean.
pub fn decode_distribution(logits: &[f32], pixels: usize, anchors: &AnchorTable) -> AbPair {
    let mut a = vec![0.0f32; pixels];
    let mut b = vec![0.0f32; pixels];
    let pts = anchors.points();
    for p in 0..pixels {
        let mut max = f32::NEG_INFINITY;
        for q in 0..ANCHOR_COUNT {
            max = max.max(logits[q * pixels + p] * ANNEAL_SCALE);
        }
        let mut sum = 0.0f32;
        let (mut sa, mut sb) = (0.0f32, 0.0f32);
        for (q, pt) in pts.iter().enumerate() {
            let w = (logits[q * pixels + p] * ANNEAL_SCALE - max).exp();
            sum += w;
            sa += w * pt[0];
            sb += w * pt[1];
        }
        if sum > 0.0 {
            a[p] = sa / sum;
            b[p] = sb / sum;
        }
    }
    (a, b)
}

type AbPair = (Vec<f32>, Vec<f32>);

// --- ONNX Runtime C API types --------------------------------------
// These mirror the C API structs from onnxruntime_c_api.h.
// Only the opaque handles and the function pointers in use are defined.

#[repr(C)]
struct OrtEnv {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtSession {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtSessionOptions {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtValue {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtMemoryInfo {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtStatus {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtRunOptions {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtAllocator {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtTensorTypeAndShapeInfo {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtTypeInfo {
    _private: [u8; 0],
}

/// ORT API version we target.
const ORT_API_VERSION: u32 = 18;

#[allow(dead_code)]
#[repr(u32)]
enum OrtLoggingLevel {
    Verbose = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
    Fatal = 4,
}

#[allow(dead_code)]
#[repr(u32)]
enum ONNXTensorElementDataType {
    Undefined = 0,
    Float = 1,
}

#[repr(i32)]
#[allow(dead_code)]
enum OrtAllocatorType {
    Invalid = -1,
    DeviceAllocator = 0,
    ArenaAllocator = 1,
}

#[repr(i32)]
#[allow(dead_code)]
enum OrtMemType {
    CpuInput = -2,
    CpuOutput = -1,
    Default = 0,
}

/// `CreateSession` takes a wide string on Windows and a narrow one elsewhere.
#[cfg(windows)]
type OrtChar = u16;
#[cfg(not(windows))]
type OrtChar = c_char;

/// The OrtApi vtable; function pointers are fetched by index.
struct OrtApi {
    raw: *const c_void,
}

type CreateEnvFn = unsafe extern "C" fn(
    log_level: OrtLoggingLevel,
    logid: *const c_char,
    out: *mut *mut OrtEnv,
) -> *mut OrtStatus;
type CreateSessionOptionsFn = unsafe extern "C" fn(out: *mut *mut OrtSessionOptions) -> *mut OrtStatus;
type CreateSessionFn = unsafe extern "C" fn(
    env: *const OrtEnv,
    model_path: *const OrtChar,
    options: *const OrtSessionOptions,
    out: *mut *mut OrtSession,
) -> *mut OrtStatus;
type CreateTensorWithDataAsOrtValueFn = unsafe extern "C" fn(
    info: *const OrtMemoryInfo,
    data: *mut c_void,
    data_len: usize,
    shape: *const i64,
    shape_len: usize,
    element_type: ONNXTensorElementDataType,
    out: *mut *mut OrtValue,
) -> *mut OrtStatus;
type CreateCpuMemoryInfoFn = unsafe extern "C" fn(
    alloc_type: OrtAllocatorType,
    mem_type: OrtMemType,
    out: *mut *mut OrtMemoryInfo,
) -> *mut OrtStatus;
type RunFn = unsafe extern "C" fn(
    session: *mut OrtSession,
    run_options: *const OrtRunOptions,
    input_names: *const *const c_char,
    inputs: *const *const OrtValue,
    input_count: usize,
    output_names: *const *const c_char,
    output_count: usize,
    outputs: *mut *mut OrtValue,
) -> *mut OrtStatus;
type GetTensorMutableDataFn = unsafe extern "C" fn(value: *mut OrtValue, out: *mut *mut c_void) -> *mut OrtStatus;
type GetTensorTypeAndShapeFn =
    unsafe extern "C" fn(value: *const OrtValue, out: *mut *mut OrtTensorTypeAndShapeInfo) -> *mut OrtStatus;
type GetDimensionsCountFn =
    unsafe extern "C" fn(info: *const OrtTensorTypeAndShapeInfo, out: *mut usize) -> *mut OrtStatus;
type GetDimensionsFn = unsafe extern "C" fn(
    info: *const OrtTensorTypeAndShapeInfo,
    dim_values: *mut i64,
    dim_values_length: usize,
) -> *mut OrtStatus;
type ReleaseEnvFn = unsafe extern "C" fn(env: *mut OrtEnv);
type ReleaseSessionFn = unsafe extern "C" fn(session: *mut OrtSession);
type ReleaseSessionOptionsFn = unsafe extern "C" fn(options: *mut OrtSessionOptions);
type ReleaseValueFn = unsafe extern "C" fn(value: *mut OrtValue);
type ReleaseMemoryInfoFn = unsafe extern "C" fn(info: *mut OrtMemoryInfo);
type ReleaseTensorTypeAndShapeInfoFn = unsafe extern "C" fn(info: *mut OrtTensorTypeAndShapeInfo);
type ReleaseStatusFn = unsafe extern "C" fn(status: *mut OrtStatus);
type GetErrorMessageFn = unsafe extern "C" fn(status: *const OrtStatus) -> *const c_char;
type SetIntraOpNumThreadsFn =
    unsafe extern "C" fn(options: *mut OrtSessionOptions, intra_op_num_threads: i32) -> *mut OrtStatus;
type SetSessionGraphOptimizationLevelFn =
    unsafe extern "C" fn(options: *mut OrtSessionOptions, graph_optimization_level: u32) -> *mut OrtStatus;
type SessionGetCountFn = unsafe extern "C" fn(session: *const OrtSession, out: *mut usize) -> *mut OrtStatus;
type SessionGetNameFn = unsafe extern "C" fn(
    session: *const OrtSession,
    index: usize,
    allocator: *mut OrtAllocator,
    out: *mut *mut c_char,
) -> *mut OrtStatus;
type GetAllocatorWithDefaultOptionsFn = unsafe extern "C" fn(out: *mut *mut OrtAllocator) -> *mut OrtStatus;
type AllocatorFreeFn = unsafe extern "C" fn(allocator: *mut OrtAllocator, ptr: *mut c_void) -> *mut OrtStatus;
type SessionGetInputTypeInfoFn =
    unsafe extern "C" fn(session: *const OrtSession, index: usize, type_info: *mut *mut OrtTypeInfo) -> *mut OrtStatus;
type CastTypeInfoToTensorInfoFn =
    unsafe extern "C" fn(type_info: *const OrtTypeInfo, out: *mut *const OrtTensorTypeAndShapeInfo) -> *mut OrtStatus;
type ReleaseTypeInfoFn = unsafe extern "C" fn(type_info: *mut OrtTypeInfo);

/// OrtApiBase: the entry point struct returned by OrtGetApiBase()
#[repr(C)]
struct OrtApiBase {
    get_api: unsafe extern "C" fn(version: u32) -> *const c_void,
    get_version_string: unsafe extern "C" fn() -> *const c_char,
}

impl OrtApi {
    unsafe fn get_fn<T>(&self, index: usize) -> T {
        let ptr = self.raw as *const *const c_void;
        let fn_ptr = *ptr.add(index);
        std::mem::transmute_copy(&fn_ptr)
    }

    // Indices are positions in the OrtApi struct of onnxruntime_c_api.h:
    //  2 GetErrorMessage   3 CreateEnv   7 CreateSession   9 Run
    // 10 CreateSessionOptions   23 SetSessionGraphOptimizationLevel
    // 24 SetIntraOpNumThreads   30/31 SessionGetInput/OutputCount
    // 33 SessionGetInputTypeInfo   36/37 SessionGetInput/OutputName
    // 49 CreateTensorWithDataAsOrtValue   51 GetTensorMutableData
    // 55 CastTypeInfoToTensorInfo   61 GetDimensionsCount   62 GetDimensions
    // 65 GetTensorTypeAndShape   69 CreateCpuMemoryInfo   76 AllocatorFree
    // 78 GetAllocatorWithDefaultOptions   92..100 Release*

    fn create_env(&self) -> CreateEnvFn {
        unsafe { self.get_fn(3) }
    }
    fn create_session(&self) -> CreateSessionFn {
        unsafe { self.get_fn(7) }
    }
    fn run(&self) -> RunFn {
        unsafe { self.get_fn(9) }
    }
    fn create_session_options(&self) -> CreateSessionOptionsFn {
        unsafe { self.get_fn(10) }
    }
    fn set_session_graph_optimization_level(&self) -> SetSessionGraphOptimizationLevelFn {
        unsafe { self.get_fn(23) }
    }
    fn set_intra_op_num_threads(&self) -> SetIntraOpNumThreadsFn {
        unsafe { self.get_fn(24) }
    }
    fn session_get_input_count(&self) -> SessionGetCountFn {
        unsafe { self.get_fn(30) }
    }
    fn session_get_output_count(&self) -> SessionGetCountFn {
        unsafe { self.get_fn(31) }
    }
    fn session_get_input_type_info(&self) -> SessionGetInputTypeInfoFn {
        unsafe { self.get_fn(33) }
    }
    fn session_get_input_name(&self) -> SessionGetNameFn {
        unsafe { self.get_fn(36) }
    }
    fn session_get_output_name(&self) -> SessionGetNameFn {
        unsafe { self.get_fn(37) }
    }
    fn create_tensor_with_data(&self) -> CreateTensorWithDataAsOrtValueFn {
        unsafe { self.get_fn(49) }
    }
    fn get_tensor_mutable_data(&self) -> GetTensorMutableDataFn {
        unsafe { self.get_fn(51) }
    }
    fn cast_type_info_to_tensor_info(&self) -> CastTypeInfoToTensorInfoFn {
        unsafe { self.get_fn(55) }
    }
    fn get_dimensions_count(&self) -> GetDimensionsCountFn {
        unsafe { self.get_fn(61) }
    }
    fn get_dimensions(&self) -> GetDimensionsFn {
        unsafe { self.get_fn(62) }
    }
    fn get_tensor_type_and_shape(&self) -> GetTensorTypeAndShapeFn {
        unsafe { self.get_fn(65) }
    }
    fn create_cpu_memory_info(&self) -> CreateCpuMemoryInfoFn {
        unsafe { self.get_fn(69) }
    }
    fn allocator_free(&self) -> AllocatorFreeFn {
        unsafe { self.get_fn(76) }
    }
    fn get_allocator_with_default_options(&self) -> GetAllocatorWithDefaultOptionsFn {
        unsafe { self.get_fn(78) }
    }
    fn release_env(&self) -> ReleaseEnvFn {
        unsafe { self.get_fn(92) }
    }
    fn release_status(&self) -> ReleaseStatusFn {
        unsafe { self.get_fn(93) }
    }
    fn release_memory_info(&self) -> ReleaseMemoryInfoFn {
        unsafe { self.get_fn(94) }
    }
    fn release_session(&self) -> ReleaseSessionFn {
        unsafe { self.get_fn(95) }
    }
    fn release_value(&self) -> ReleaseValueFn {
        unsafe { self.get_fn(96) }
    }
    fn release_type_info(&self) -> ReleaseTypeInfoFn {
        unsafe { self.get_fn(98) }
    }
    fn release_tensor_type_and_shape_info(&self) -> ReleaseTensorTypeAndShapeInfoFn {
        unsafe { self.get_fn(99) }
    }
    fn release_session_options(&self) -> ReleaseSessionOptionsFn {
        unsafe { self.get_fn(100) }
    }
    fn get_error_message(&self) -> GetErrorMessageFn {
        unsafe { self.get_fn(2) }
    }
}

/// Turn an OrtStatus into a Result; a null status means success.
unsafe fn status_to_result(api: &OrtApi, status: *mut OrtStatus) -> Result<(), String> {
    if status.is_null() {
        return Ok(());
    }
    let msg_ptr = (api.get_error_message())(status);
    let msg = if msg_ptr.is_null() {
        "Unknown error".to_string()
    } else {
        CStr::from_ptr(msg_ptr).to_string_lossy().into_owned()
    };
    (api.release_status())(status);
    Err(msg)
}

/// Minimum supported ONNX Runtime version; older builds lay out the
/// version-18 vtable differently.
const ORT_MIN_VERSION: (u32, u32) = (1, 16);

/// Reject runtime library paths that are relative, contain `..`, or do not
/// carry a shared-library extension.
pub fn validate_runtime_path(path: &str) -> Result<(), ModelError> {
    use std::path::Component;
    let p = Path::new(path);

    if path.is_empty() {
        return Err(ModelError::RuntimeNotConfigured);
    }
    if !p.is_absolute() {
        return Err(ModelError::RuntimeLoadFailed(format!(
            "runtime path must be absolute: {path}"
        )));
    }
    if p.components().any(|c| c == Component::ParentDir) {
        return Err(ModelError::RuntimeLoadFailed(
            "runtime path must not contain '..' components".to_string(),
        ));
    }
    let ext = p
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !["dll", "so", "dylib"].contains(&ext.as_str()) {
        return Err(ModelError::RuntimeLoadFailed(format!(
            "expected a .dll/.so/.dylib file, got '.{ext}'"
        )));
    }
    Ok(())
}

/// Parse a version string like "1.18.0" into (major, minor).
fn parse_ort_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major: u32 = parts.next()?.trim().parse().ok()?;
    let minor: u32 = parts.next()?.trim().parse().ok()?;
    Some((major, minor))
}

/// Resolve the versioned API table from a loaded runtime library.
unsafe fn load_api(lib: &libloading::Library) -> Result<(OrtApi, String), ModelError> {
    let get_api_base: libloading::Symbol<unsafe extern "C" fn() -> *const OrtApiBase> = lib
        .get(b"OrtGetApiBase")
        .map_err(|e| ModelError::RuntimeLoadFailed(format!("symbol OrtGetApiBase not found: {e}")))?;

    let api_base = get_api_base();
    if api_base.is_null() {
        return Err(ModelError::ApiInitFailed("OrtGetApiBase returned null".to_string()));
    }

    let version_ptr = ((*api_base).get_version_string)();
    let version = if version_ptr.is_null() {
        "unknown".to_string()
    } else {
        CStr::from_ptr(version_ptr).to_string_lossy().into_owned()
    };

    if let Some((major, minor)) = parse_ort_version(&version) {
        let (min_major, min_minor) = ORT_MIN_VERSION;
        if major < min_major || (major == min_major && minor < min_minor) {
            return Err(ModelError::ApiInitFailed(format!(
                "ONNX Runtime {version} is too old, {min_major}.{min_minor} or newer is required"
            )));
        }
    }

    let api_ptr = ((*api_base).get_api)(ORT_API_VERSION);
    if api_ptr.is_null() {
        return Err(ModelError::ApiInitFailed(format!(
            "OrtGetApi({ORT_API_VERSION}) returned null, runtime {version} may be too old"
        )));
    }
    Ok((OrtApi { raw: api_ptr }, version))
}

/// Load the runtime library and report its version without creating a session.
pub fn probe_onnx_runtime(runtime_path: &str) -> Result<String, ModelError> {
    validate_runtime_path(runtime_path)?;
    if !Path::new(runtime_path).exists() {
        return Err(ModelError::RuntimeNotFound(runtime_path.to_string()));
    }
    unsafe {
        let lib = libloading::Library::new(runtime_path)
            .map_err(|e| ModelError::RuntimeLoadFailed(e.to_string()))?;
        load_api(&lib).map(|(_, version)| version)
    }
}

fn ort_path(path: &Path) -> Result<Vec<OrtChar>, ModelError> {
    let s = path
        .to_str()
        .ok_or_else(|| ModelError::SessionCreateFailed(format!("non-UTF-8 path {}", path.display())))?;
    #[cfg(windows)]
    {
        Ok(s.encode_utf16().chain(std::iter::once(0)).collect())
    }
    #[cfg(not(windows))]
    {
        let c = CString::new(s)
            .map_err(|_| ModelError::SessionCreateFailed("path contains NUL".to_string()))?;
        Ok(c.into_bytes_with_nul().into_iter().map(|b| b as c_char).collect())
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// A loaded colorization network. Handles are released on drop, before the
/// runtime library itself is unloaded.
pub struct OnnxColorizer {
    api: OrtApi,
    env: *mut OrtEnv,
    options: *mut OrtSessionOptions,
    session: *mut OrtSession,
    memory_info: *mut OrtMemoryInfo,
    input_name: CString,
    output_name: CString,
    input_h: u32,
    input_w: u32,
    anchors: AnchorTable,
    version: String,
    run_lock: Mutex<()>,
    // Declared last so it drops after `Drop::drop` has released every handle.
    _lib: libloading::Library,
}

// SAFETY: the handles are only used through `&self` with `run_lock` held
// around `Run`; ORT sessions are thread-safe for concurrent `Run` anyway.
unsafe impl Send for OnnxColorizer {}
unsafe impl Sync for OnnxColorizer {}

impl OnnxColorizer {
    /// Load the runtime from `runtime_path` and create a session for the
    /// network in `resources`.
    pub fn load(runtime_path: &str, resources: &ModelResources) -> Result<Self, ModelError> {
        validate_runtime_path(runtime_path)?;
        if !Path::new(runtime_path).exists() {
            return Err(ModelError::RuntimeNotFound(runtime_path.to_string()));
        }
        let anchors = AnchorTable::load(&resources.anchors)?;

        unsafe {
            let lib = libloading::Library::new(runtime_path)
                .map_err(|e| ModelError::RuntimeLoadFailed(e.to_string()))?;
            let (api, version) = load_api(&lib)?;
            log::info!("ONNX Runtime {} loaded from {}", version, runtime_path);

            let mut this = OnnxColorizer {
                api,
                env: std::ptr::null_mut(),
                options: std::ptr::null_mut(),
                session: std::ptr::null_mut(),
                memory_info: std::ptr::null_mut(),
                input_name: CString::default(),
                output_name: CString::default(),
                input_h: DEFAULT_INPUT_SIZE,
                input_w: DEFAULT_INPUT_SIZE,
                anchors,
                version,
                run_lock: Mutex::new(()),
                _lib: lib,
            };
            this.init_session(&resources.topology)?;
            Ok(this)
        }
    }

    /// Fill in the session handles. On error the partially initialised
    /// handles are released by `Drop`.
    unsafe fn init_session(&mut self, topology: &Path) -> Result<(), ModelError> {
        let api = &self.api;

        let log_id = CString::new("ChromaFE").map_err(|e| ModelError::ApiInitFailed(e.to_string()))?;
        status_to_result(api, (api.create_env())(OrtLoggingLevel::Warning, log_id.as_ptr(), &mut self.env))
            .map_err(ModelError::ApiInitFailed)?;

        status_to_result(api, (api.create_session_options())(&mut self.options))
            .map_err(ModelError::SessionCreateFailed)?;
        let threads = num_cpus().max(1) as i32;
        let _ = status_to_result(api, (api.set_intra_op_num_threads())(self.options, threads));
        // ORT_ENABLE_ALL = 99
        let _ = status_to_result(api, (api.set_session_graph_optimization_level())(self.options, 99));

        // External weights are resolved relative to the topology file.
        let model_path = ort_path(topology)?;
        status_to_result(
            api,
            (api.create_session())(self.env, model_path.as_ptr(), self.options, &mut self.session),
        )
        .map_err(ModelError::SessionCreateFailed)?;

        let mut allocator: *mut OrtAllocator = std::ptr::null_mut();
        status_to_result(api, (api.get_allocator_with_default_options())(&mut allocator))
            .map_err(|e| ModelError::SessionCreateFailed(format!("get allocator: {e}")))?;

        let mut inputs = 0usize;
        let mut outputs = 0usize;
        status_to_result(api, (api.session_get_input_count())(self.session, &mut inputs))
            .map_err(ModelError::SessionCreateFailed)?;
        status_to_result(api, (api.session_get_output_count())(self.session, &mut outputs))
            .map_err(ModelError::SessionCreateFailed)?;
        if inputs != 1 || outputs == 0 {
            return Err(ModelError::SessionCreateFailed(format!(
                "expected one input and at least one output, found {inputs} and {outputs}"
            )));
        }

        self.input_name = session_name(api, self.session, 0, allocator, api.session_get_input_name())?;
        self.output_name = session_name(api, self.session, 0, allocator, api.session_get_output_name())?;

        if let Some((h, w)) = input_spatial_dims(api, self.session) {
            self.input_h = h;
            self.input_w = w;
        }
        log::info!(
            "Colorization model ready: input '{}' {}x{}, output '{}'",
            self.input_name.to_string_lossy(),
            self.input_w,
            self.input_h,
            self.output_name.to_string_lossy()
        );

        status_to_result(
            api,
            (api.create_cpu_memory_info())(
                OrtAllocatorType::ArenaAllocator,
                OrtMemType::Default,
                &mut self.memory_info,
            ),
        )
        .map_err(|e| ModelError::SessionCreateFailed(format!("create memory info: {e}")))?;
        Ok(())
    }

    pub fn runtime_version(&self) -> &str {
        &self.version
    }

    unsafe fn run(&self, l_centered: &[f32]) -> Result<(Vec<i64>, Vec<f32>), ModelError> {
        let api = &self.api;
        let _guard = self
            .run_lock
            .lock()
            .map_err(|_| ModelError::InferenceFailed("session lock poisoned".to_string()))?;

        let mut data = l_centered.to_vec();
        let shape: [i64; 4] = [1, 1, self.input_h as i64, self.input_w as i64];
        let mut input = ValueGuard::new(api);
        status_to_result(
            api,
            (api.create_tensor_with_data())(
                self.memory_info,
                data.as_mut_ptr() as *mut c_void,
                data.len() * std::mem::size_of::<f32>(),
                shape.as_ptr(),
                shape.len(),
                ONNXTensorElementDataType::Float,
                &mut input.ptr,
            ),
        )
        .map_err(|e| ModelError::InferenceFailed(format!("create input tensor: {e}")))?;

        let input_names = [self.input_name.as_ptr()];
        let output_names = [self.output_name.as_ptr()];
        let inputs = [input.ptr as *const OrtValue];
        let mut output = ValueGuard::new(api);
        status_to_result(
            api,
            (api.run())(
                self.session,
                std::ptr::null(),
                input_names.as_ptr(),
                inputs.as_ptr(),
                1,
                output_names.as_ptr(),
                1,
                &mut output.ptr,
            ),
        )
        .map_err(ModelError::InferenceFailed)?;
        if output.ptr.is_null() {
            return Err(ModelError::InvalidOutput("no output tensor".to_string()));
        }

        let dims = tensor_dims(api, output.ptr)?;
        let total: i64 = dims.iter().product();
        if total <= 0 {
            return Err(ModelError::InvalidOutput(format!("empty output {dims:?}")));
        }
        let mut data_ptr: *mut c_void = std::ptr::null_mut();
        status_to_result(api, (api.get_tensor_mutable_data())(output.ptr, &mut data_ptr))
            .map_err(|e| ModelError::InvalidOutput(format!("get tensor data: {e}")))?;
        if data_ptr.is_null() {
            return Err(ModelError::InvalidOutput("null tensor data".to_string()));
        }
        let values = std::slice::from_raw_parts(data_ptr as *const f32, total as usize).to_vec();
        Ok((dims, values))
    }
}

impl ColorizationModel for OnnxColorizer {
    fn input_size(&self) -> (u32, u32) {
        (self.input_w, self.input_h)
    }

    fn predict_ab(&self, l_centered: &[f32]) -> Result<AbPlane, ModelError> {
        let expected = self.input_w as usize * self.input_h as usize;
        if l_centered.len() != expected {
            return Err(ModelError::InferenceFailed(format!(
                "expected {expected} input values, got {}",
                l_centered.len()
            )));
        }
        let (dims, values) = unsafe { self.run(l_centered)? };

        // [1, C, h, w] or [C, h, w]
        let (c, h, w) = match dims.as_slice() {
            [1, c, h, w] | [c, h, w] => (*c as usize, *h as u32, *w as u32),
            other => {
                return Err(ModelError::InvalidOutput(format!("unexpected output shape {other:?}")));
            }
        };
        let pixels = w as usize * h as usize;
        let (a, b) = match c {
            2 => (values[..pixels].to_vec(), values[pixels..2 * pixels].to_vec()),
            ANCHOR_COUNT => decode_distribution(&values, pixels, &self.anchors),
            other => {
                return Err(ModelError::InvalidOutput(format!(
                    "expected 2 or {ANCHOR_COUNT} output channels, found {other}"
                )));
            }
        };
        Ok(AbPlane { width: w, height: h, a, b })
    }
}

impl Drop for OnnxColorizer {
    fn drop(&mut self) {
        let api = &self.api;
        unsafe {
            if !self.memory_info.is_null() {
                (api.release_memory_info())(self.memory_info);
            }
            if !self.session.is_null() {
                (api.release_session())(self.session);
            }
            if !self.options.is_null() {
                (api.release_session_options())(self.options);
            }
            if !self.env.is_null() {
                (api.release_env())(self.env);
            }
        }
    }
}

/// Releases an OrtValue when it goes out of scope.
struct ValueGuard<'a> {
    api: &'a OrtApi,
    ptr: *mut OrtValue,
}

impl<'a> ValueGuard<'a> {
    fn new(api: &'a OrtApi) -> Self {
        Self {
            api,
            ptr: std::ptr::null_mut(),
        }
    }
}

impl Drop for ValueGuard<'_> {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { (self.api.release_value())(self.ptr) };
        }
    }
}

unsafe fn tensor_dims(api: &OrtApi, value: *mut OrtValue) -> Result<Vec<i64>, ModelError> {
    let mut info: *mut OrtTensorTypeAndShapeInfo = std::ptr::null_mut();
    status_to_result(api, (api.get_tensor_type_and_shape())(value, &mut info))
        .map_err(|e| ModelError::InvalidOutput(format!("get output shape: {e}")))?;
    let mut count = 0usize;
    let mut dims = Vec::new();
    let res = status_to_result(api, (api.get_dimensions_count())(info, &mut count)).and_then(|_| {
        dims = vec![0i64; count];
        status_to_result(api, (api.get_dimensions())(info, dims.as_mut_ptr(), count))
    });
    (api.release_tensor_type_and_shape_info())(info);
    res.map_err(ModelError::InvalidOutput)?;
    Ok(dims)
}

/// Static spatial size of input 0, if the graph declares one.
unsafe fn input_spatial_dims(api: &OrtApi, session: *mut OrtSession) -> Option<(u32, u32)> {
    let mut type_info: *mut OrtTypeInfo = std::ptr::null_mut();
    status_to_result(api, (api.session_get_input_type_info())(session, 0, &mut type_info)).ok()?;
    if type_info.is_null() {
        return None;
    }
    // tensor_info is owned by type_info
    let mut tensor_info: *const OrtTensorTypeAndShapeInfo = std::ptr::null();
    let mut dims = Vec::new();
    let ok = status_to_result(api, (api.cast_type_info_to_tensor_info())(type_info, &mut tensor_info)).is_ok()
        && !tensor_info.is_null()
        && {
            let mut count = 0usize;
            status_to_result(api, (api.get_dimensions_count())(tensor_info, &mut count)).is_ok() && {
                dims = vec![0i64; count];
                status_to_result(api, (api.get_dimensions())(tensor_info, dims.as_mut_ptr(), count)).is_ok()
            }
        };
    (api.release_type_info())(type_info);
    if !ok || dims.len() < 2 {
        return None;
    }
    let (h, w) = (dims[dims.len() - 2], dims[dims.len() - 1]);
    (h > 0 && w > 0).then_some((h as u32, w as u32))
}

unsafe fn session_name(
    api: &OrtApi,
    session: *mut OrtSession,
    index: usize,
    allocator: *mut OrtAllocator,
    getter: SessionGetNameFn,
) -> Result<CString, ModelError> {
    let mut name_ptr: *mut c_char = std::ptr::null_mut();
    status_to_result(api, getter(session, index, allocator, &mut name_ptr))
        .map_err(|e| ModelError::SessionCreateFailed(format!("get tensor name: {e}")))?;
    if name_ptr.is_null() {
        return Err(ModelError::SessionCreateFailed("tensor name is null".to_string()));
    }
    let name = CStr::from_ptr(name_ptr).to_owned();
    (api.allocator_free())(allocator, name_ptr as *mut c_void);
    Ok(name)
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
