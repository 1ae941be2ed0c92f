pub type JobName = String;
pub type Program = String;
/// Space-delimited argument string, split on whitespace at launch.
pub type Args = String;
pub type SubscriberId = String;
pub type OutputBlob = bytes::Bytes;
