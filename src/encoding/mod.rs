pub mod key;
pub mod record;

pub use key::{EncodedKey, decode_value, encode_value, prefix_successor};
pub use record::{EncodedDocument, encode_document};
