//! C ABI over the decoder.
//!
//! Strings returned by [`textgen_generate`] are owned by the caller and must
//! be released with [`textgen_string_free`]. Failures are returned as text
//! starting with `"Error: "`, never as a crash.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::SeedableRng;
use textgen::quant::QTransformer;
use textgen::{Decoder, SamplingParams, Scorer, Tokenizer, VocabTokenizer};

/// A loaded model and tokenizer.
pub struct TextgenEngine {
    model: QTransformer,
    tokenizer: VocabTokenizer,
}

impl TextgenEngine {
    pub fn load(checkpoint: PathBuf, vocab: Option<PathBuf>) -> Result<Self, String> {
        let model = QTransformer::load_mmap(&checkpoint)
            .or_else(|_| QTransformer::load(&checkpoint))
            .map_err(|e| e.to_string())?;
        let tokenizer = match vocab {
            Some(path) => VocabTokenizer::load(path).map_err(|e| e.to_string())?,
            None => VocabTokenizer::ascii(),
        };
        if tokenizer.vocab_size() != model.vocab_size() {
            return Err(format!(
                "tokenizer has {} pieces but the model scores {} tokens",
                tokenizer.vocab_size(),
                model.vocab_size()
            ));
        }
        Ok(Self { model, tokenizer })
    }

    /// Generated text or an `"Error: ..."` message.
    pub fn generate(&self, prompt: &str, params: &SamplingParams, seed: u64) -> String {
        let decoder = Decoder::new(&self.tokenizer, &self.model);
        let mut rng = StdRng::seed_from_u64(seed);
        match decoder.generate(prompt, params, &mut rng) {
            Ok(g) => g.text,
            Err(e) => format!("Error: {e}"),
        }
    }
}

fn into_c_string(text: String) -> *mut c_char {
    match CString::new(text) {
        Ok(s) => s.into_raw(),
        Err(_) => CString::new("Error: output contains a NUL byte")
            .map(CString::into_raw)
            .unwrap_or(std::ptr::null_mut()),
    }
}

/// Load an 8-bit checkpoint and an optional JSON vocabulary (null for the
/// ASCII vocabulary). Returns null on failure.
#[no_mangle]
pub extern "C" fn textgen_engine_new(
    checkpoint: *const c_char,
    vocab_json: *const c_char,
) -> *mut TextgenEngine {
    if checkpoint.is_null() {
        return std::ptr::null_mut();
    }
    let c_str = unsafe { CStr::from_ptr(checkpoint) };
    let checkpoint = PathBuf::from(c_str.to_string_lossy().into_owned());
    let vocab = if vocab_json.is_null() {
        None
    } else {
        let c_str = unsafe { CStr::from_ptr(vocab_json) };
        Some(PathBuf::from(c_str.to_string_lossy().into_owned()))
    };
    match TextgenEngine::load(checkpoint, vocab) {
        Ok(engine) => Box::into_raw(Box::new(engine)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load engine");
            std::ptr::null_mut()
        }
    }
}

/// Continue `prompt`. Returns a caller-owned string; null only if `engine`
/// or `prompt` is null.
#[no_mangle]
pub extern "C" fn textgen_generate(
    engine: *const TextgenEngine,
    prompt: *const c_char,
    max_steps: usize,
    temperature: f32,
    top_k: usize,
    seed: u64,
) -> *mut c_char {
    if engine.is_null() || prompt.is_null() {
        return std::ptr::null_mut();
    }
    let engine = unsafe { &*engine };
    let prompt = unsafe { CStr::from_ptr(prompt) };
    let text = match prompt.to_str() {
        Ok(prompt) => {
            let params = SamplingParams::new(max_steps, temperature, top_k);
            engine.generate(prompt, &params, seed)
        }
        Err(e) => format!("Error: prompt is not valid UTF-8: {e}"),
    };
    into_c_string(text)
}

#[no_mangle]
pub extern "C" fn textgen_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            drop(CString::from_raw(ptr));
        }
    }
}

#[no_mangle]
pub extern "C" fn textgen_engine_free(engine: *mut TextgenEngine) {
    if !engine.is_null() {
        unsafe { drop(Box::from_raw(engine)); }
    }
}
