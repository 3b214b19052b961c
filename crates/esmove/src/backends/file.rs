pub(crate) mod file_sink;
pub(crate) mod file_source;

pub(crate) use self::file_sink::FileSink;
pub(crate) use self::file_source::FileSource;
