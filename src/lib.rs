// seadaq: research-vessel data acquisition.
//
// Facade over the workspace crates: the record model, the pipeline core,
// and (as a service crate) the Cached Data Server.  The root package also
// hosts the cross-crate integration suites under tests/integration/.

pub use daq_core;
pub use das_record;

pub use daq_core::{ComposedReader, ComposedWriter, Listener};
pub use das_record::{DasRecord, Format, Record};
