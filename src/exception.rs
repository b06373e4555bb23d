use crate::models::{ExceptionDetails, StackFrame};
use once_cell::sync::Lazy;
use std::{
    backtrace::{Backtrace, BacktraceStatus},
    collections::HashMap,
    panic::Location,
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

pub(crate) const DEFAULT_TYPE_NAME: &str = "Exception";
pub(crate) const DEFAULT_MESSAGE: &str = "Technical exception";

/// Innermost frames that belong to capturing the stack rather than to the code that failed.
const CAPTURE_FRAME_PREFIXES: &[&str] = &[
    "std::backtrace",
    "backtrace::",
    "std::panicking",
    "core::panicking",
    "std::sys",
    "rust_begin_unwind",
    "__rustc::rust_begin_unwind",
    "<alloc::boxed::Box<F,A> as core::ops::function::Fn<Args>>::call",
    module_path!(),
    concat!(env!("CARGO_CRATE_NAME"), "::client::"),
    concat!(env!("CARGO_CRATE_NAME"), "::panic_hook::"),
];

/// Source files read for exception frames, kept for the life of the process. `None` marks a file
/// that is unreadable or outside the working directory.
static SOURCES: Lazy<Mutex<HashMap<PathBuf, Option<Arc<str>>>>> = Lazy::new(Default::default);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawFrame {
    pub(crate) symbol: String,
    pub(crate) file: Option<String>,
    pub(crate) line: Option<u32>,
}

impl RawFrame {
    fn from_location(location: &Location<'_>) -> Self {
        RawFrame {
            symbol: location.to_string(),
            file: Some(location.file().to_string()),
            line: Some(location.line()),
        }
    }

    fn into_stack_frame(self, level: usize) -> StackFrame {
        StackFrame {
            level: i32::try_from(level).unwrap_or(i32::MAX),
            assembly: assembly_name(&self.symbol),
            method: self.symbol,
            file_name: self.file,
            line: self.line,
        }
    }
}

/// Exception details plus the source text of each frame, in the same order as the stack.
#[derive(Debug)]
pub(crate) struct CapturedException {
    pub(crate) details: ExceptionDetails,
    pub(crate) code: Vec<String>,
}

/// Builds exception details from a backtrace. The resulting stack is never empty: without a
/// usable backtrace the caller location is recorded as the only frame.
pub(crate) fn capture(
    type_name: Option<String>,
    message: Option<String>,
    backtrace: Option<&Backtrace>,
    skip_frames: usize,
    location: &Location<'_>,
) -> CapturedException {
    let mut frames = match backtrace {
        Some(backtrace) if backtrace.status() == BacktraceStatus::Captured => {
            stack_frames(parse_backtrace(&backtrace.to_string()), skip_frames)
        }
        _ => Vec::new(),
    };
    if frames.is_empty() {
        frames.push(RawFrame::from_location(location));
    }

    let code = frames.iter().map(source_text).collect();

    CapturedException {
        details: ExceptionDetails {
            id: 1,
            outer_id: 0,
            type_name: type_name.unwrap_or_else(|| DEFAULT_TYPE_NAME.into()),
            message: message.unwrap_or_else(|| DEFAULT_MESSAGE.into()),
            has_full_stack: true,
            parsed_stack: frames
                .into_iter()
                .enumerate()
                .map(|(level, frame)| frame.into_stack_frame(level))
                .collect(),
        },
        code,
    }
}

/// Parses the `Display` output of a backtrace, innermost frame first.
///
/// ```text
///    0: app::handler
///              at ./src/main.rs:10:5
///    1: app::main
/// ```
pub(crate) fn parse_backtrace(text: &str) -> Vec<RawFrame> {
    let mut frames: Vec<RawFrame> = Vec::new();
    for line in text.lines().map(str::trim) {
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut().filter(|f| f.file.is_none()) {
                let (file, line) = parse_location(location);
                frame.file = Some(file);
                frame.line = line;
            }
        } else if let Some((index, symbol)) = line.split_once(": ") {
            if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
                frames.push(RawFrame {
                    symbol: symbol.trim().to_string(),
                    file: None,
                    line: None,
                });
            }
        }
    }
    frames
}

fn parse_location(location: &str) -> (String, Option<u32>) {
    let (rest, last) = match location.rsplit_once(':') {
        Some((rest, last)) if last.parse::<u32>().is_ok() => (rest, last),
        _ => return (location.to_string(), None),
    };
    match rest.rsplit_once(':') {
        Some((file, line)) if line.parse::<u32>().is_ok() => (file.to_string(), line.parse().ok()),
        _ => (rest.to_string(), last.parse().ok()),
    }
}

/// Drops capture frames and `skip_frames` more from the innermost end, then orders the rest
/// outermost first.
pub(crate) fn stack_frames(frames: Vec<RawFrame>, skip_frames: usize) -> Vec<RawFrame> {
    let mut frames: Vec<RawFrame> = frames
        .into_iter()
        .skip_while(|frame| {
            CAPTURE_FRAME_PREFIXES
                .iter()
                .any(|prefix| frame.symbol.starts_with(prefix))
        })
        .skip(skip_frames)
        .collect();
    frames.reverse();
    frames
}

fn assembly_name(symbol: &str) -> String {
    let name: String = symbol
        .trim_start_matches('<')
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        "<unknown>".into()
    } else {
        name
    }
}

fn source_text(frame: &RawFrame) -> String {
    let text = match (&frame.file, frame.line) {
        (Some(file), Some(line)) if line > 0 => source_line(Path::new(file), line as usize - 1),
        _ => None,
    };
    text.unwrap_or_else(|| frame.symbol.clone())
}

fn source_line(path: &Path, index: usize) -> Option<String> {
    let content = SOURCES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(path.to_path_buf())
        .or_insert_with(|| read_source(path))
        .clone()?;
    content
        .lines()
        .nth(index)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(String::from)
}

/// Reads files below the working directory only. Frames in the toolchain, the registry or other
/// system locations keep their symbol.
fn read_source(path: &Path) -> Option<Arc<str>> {
    if path.components().any(|c| c == Component::ParentDir) {
        return None;
    }
    if path.is_absolute() && !path.starts_with(std::env::current_dir().ok()?) {
        return None;
    }
    std::fs::read_to_string(path).ok().map(Arc::from)
}
