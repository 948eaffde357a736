// runner-sdk: Foundation layer of the runner supervisor.
// No dependencies on other workspace crates: error taxonomy, trace sink,
// process invoker and build metadata.

pub mod build_constants;
pub mod error;
pub mod process_invoker;
pub mod string_util;
pub mod trace;

pub use build_constants::{RunnerPackage, Source};
pub use error::{BoxError, ErrorKind, RunnerError};
pub use process_invoker::{
    OutputSink, ProcessDataReceivedEventArgs, ProcessInvoker, AUTO_UPDATE_EXIT_CODE,
};
pub use string_util::StringUtil;
pub use trace::TraceWriter;
