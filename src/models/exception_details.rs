use crate::models::{truncate_chars, Sanitize};
use serde::Serialize;

/// Exception details of the exception in a chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExceptionDetails {
    /// In case exception is nested (outer exception contains inner one), the id and outerId
    /// properties are used to represent the nesting.
    pub(crate) id: i32,

    /// The value of outerId is a reference to an element in ExceptionDetails that represents the
    /// outer exception.
    pub(crate) outer_id: i32,

    /// Exception type name.
    pub(crate) type_name: String,

    /// Exception message.
    pub(crate) message: String,

    /// Indicates if full exception stack is provided in the exception.
    pub(crate) has_full_stack: bool,

    /// List of stack frames, outermost call first.
    pub(crate) parsed_stack: Vec<StackFrame>,
}

/// Stack frame information.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StackFrame {
    /// Level in the call stack.
    pub(crate) level: i32,

    /// Method name.
    pub(crate) method: String,

    /// Name of the crate the method belongs to.
    pub(crate) assembly: String,

    /// File name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) file_name: Option<String>,

    /// Line number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) line: Option<u32>,
}

impl Sanitize for ExceptionDetails {
    fn sanitize(&mut self) {
        truncate_chars(&mut self.type_name, 1024);
        truncate_chars(&mut self.message, 32768);
        for frame in self.parsed_stack.iter_mut() {
            truncate_chars(&mut frame.method, 1024);
            truncate_chars(&mut frame.assembly, 1024);
            if let Some(file_name) = frame.file_name.as_mut() {
                truncate_chars(file_name, 1024);
            }
        }
    }
}
