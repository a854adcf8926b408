pub mod error;
pub mod record;
pub mod value;

pub use error::{
    render_chain, ConnectorError, Error, ExecutionError, ParseError, Stage, TransformError,
    CHAIN_SEPARATOR,
};
pub use record::Record;
pub use value::{Number, Value};

pub type FieldflowResult<T> = Result<T, Error>;
