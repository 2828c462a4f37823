//! Streaming decoder for the film list format.
//!
//! The film list is one large JSON object whose keys repeat:
//!
//! ```text
//! {"Filmliste":["01.02.2020, 10:00", ...],"Filmliste":["Sender", ...],
//!  "X":["ARD","Tagesschau","Title", ...],"X":["","","Other title", ...], ...}
//! ```
//!
//! [`TokenReader`] walks this document with `serde_json` in a single forward
//! pass and emits [`Token`]s. [`RecordDecoder`] turns the tokens back into
//! [`CatalogRecord`]s, holding at most one record at a time.

use crate::error::SyncError;
use crate::record::CatalogRecord;
use chrono::NaiveDateTime;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserializer;
use std::fmt;
use std::io::Read;
use std::ops::ControlFlow;
use std::path::PathBuf;
use tracing::debug;

/// Key of a record array.
const RECORD_KEY: &str = "X";
/// Key of a header array.
const HEADER_KEY: &str = "Filmliste";

/// One event of the token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    HeaderStart,
    HeaderItem(String),
    HeaderEnd,
    RecordStart,
    /// A leaf value of a record. Missing values arrive as empty strings.
    RecordItem(String),
    RecordEnd,
}

#[derive(Debug, Clone, Copy)]
enum Section {
    Header,
    Record,
}

impl Section {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            RECORD_KEY => Some(Section::Record),
            HEADER_KEY => Some(Section::Header),
            _ => None,
        }
    }

    fn start(self) -> Token {
        match self {
            Section::Header => Token::HeaderStart,
            Section::Record => Token::RecordStart,
        }
    }

    fn item(self, value: String) -> Token {
        match self {
            Section::Header => Token::HeaderItem(value),
            Section::Record => Token::RecordItem(value),
        }
    }

    fn end(self) -> Token {
        match self {
            Section::Header => Token::HeaderEnd,
            Section::Record => Token::RecordEnd,
        }
    }
}

/// Callback receiving tokens. `Break` stops the stream.
pub type TokenHandler<'a> = dyn FnMut(Token) -> Result<ControlFlow<()>, SyncError> + 'a;

enum Halt {
    Stopped,
    Failed(SyncError),
}

struct TokenSink<'a> {
    handler: &'a mut TokenHandler<'a>,
    halt: Option<Halt>,
}

impl TokenSink<'_> {
    /// Hands a token to the handler. A stop or failure is remembered and
    /// unwinds the deserializer through a custom error.
    fn emit<E: de::Error>(&mut self, token: Token) -> Result<(), E> {
        match (self.handler)(token) {
            Ok(ControlFlow::Continue(())) => Ok(()),
            Ok(ControlFlow::Break(())) => {
                self.halt = Some(Halt::Stopped);
                Err(E::custom("token stream stopped"))
            }
            Err(e) => {
                self.halt = Some(Halt::Failed(e));
                Err(E::custom("token handler failed"))
            }
        }
    }
}

struct DocumentSeed<'s, 'a> {
    sink: &'s mut TokenSink<'a>,
}

impl<'de> DeserializeSeed<'de> for DocumentSeed<'_, '_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DocumentSeed<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a film list object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let sink = self.sink;
        while let Some(key) = map.next_key::<String>()? {
            match Section::from_key(&key) {
                Some(section) => map.next_value_seed(ArraySeed {
                    sink: &mut *sink,
                    section,
                })?,
                None => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

struct ArraySeed<'s, 'a> {
    sink: &'s mut TokenSink<'a>,
    section: Section,
}

impl<'de> DeserializeSeed<'de> for ArraySeed<'_, '_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ArraySeed<'_, '_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of strings")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let sink = self.sink;
        let section = self.section;
        sink.emit(section.start())?;
        while let Some(value) = seq.next_element_seed(LeafSeed)? {
            sink.emit(section.item(value))?;
        }
        sink.emit(section.end())
    }
}

/// Reads one scalar leaf as a trimmed string; `null` becomes empty.
struct LeafSeed;

impl<'de> DeserializeSeed<'de> for LeafSeed {
    type Value = String;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<String, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for LeafSeed {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string, number or null")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
        Ok(v.trim().to_string())
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
        if v.trim().len() == v.len() {
            Ok(v)
        } else {
            Ok(v.trim().to_string())
        }
    }

    fn visit_unit<E: de::Error>(self) -> Result<String, E> {
        Ok(String::new())
    }

    fn visit_none<E: de::Error>(self) -> Result<String, E> {
        Ok(String::new())
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
        Ok(v.to_string())
    }
}

/// Forward-only token source over a decompressed film list.
pub struct TokenReader<R> {
    reader: R,
    path: PathBuf,
}

impl<R: Read> TokenReader<R> {
    /// `path` is only used to attribute read errors.
    pub fn new(reader: R, path: impl Into<PathBuf>) -> Self {
        Self {
            reader,
            path: path.into(),
        }
    }

    /// Streams every token to `handler`.
    ///
    /// The reader is consumed and dropped before this returns, whatever the
    /// outcome.
    ///
    /// # Returns
    ///
    /// `Continue` when the document was read to the end, `Break` when the
    /// handler stopped it, the handler's own error, or
    /// [`SyncError::StreamIo`] for read and syntax errors.
    pub fn for_each<F>(self, mut handler: F) -> Result<ControlFlow<()>, SyncError>
    where
        F: FnMut(Token) -> Result<ControlFlow<()>, SyncError>,
    {
        let mut sink = TokenSink {
            handler: &mut handler,
            halt: None,
        };

        let result = {
            let mut deserializer = serde_json::Deserializer::from_reader(self.reader);
            DocumentSeed { sink: &mut sink }
                .deserialize(&mut deserializer)
                .and_then(|()| deserializer.end())
        };

        match (sink.halt, result) {
            (Some(Halt::Stopped), _) => Ok(ControlFlow::Break(())),
            (Some(Halt::Failed(e)), _) => Err(e),
            (None, Ok(())) => Ok(ControlFlow::Continue(())),
            (None, Err(source)) => Err(SyncError::StreamIo {
                path: self.path,
                source,
            }),
        }
    }
}

/// Output of the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete record.
    Record(CatalogRecord),
    /// Publication timestamp from the film list header.
    Published(NaiveDateTime),
}

#[derive(Debug)]
enum State {
    Idle,
    InRecord {
        record: CatalogRecord,
        cursor: usize,
    },
}

/// Rebuilds records from the token stream.
///
/// A record-start token begins a fresh record, each leaf is applied at the
/// current position and advances it, and a record-end token hands the
/// record out. Nothing carries over from one record to the next.
#[derive(Debug)]
pub struct RecordDecoder {
    state: State,
    header_arrays: usize,
    header_items: usize,
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            header_arrays: 0,
            header_items: 0,
        }
    }

    /// True between records.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    pub fn feed(&mut self, token: Token) -> Option<Decoded> {
        match token {
            Token::RecordStart => {
                self.state = State::InRecord {
                    record: CatalogRecord::default(),
                    cursor: 0,
                };
                None
            }
            Token::RecordItem(value) => {
                if let State::InRecord { record, cursor } = &mut self.state {
                    record.apply(*cursor, &value);
                    *cursor += 1;
                }
                None
            }
            Token::RecordEnd => match std::mem::replace(&mut self.state, State::Idle) {
                State::InRecord { record, .. } => Some(Decoded::Record(record)),
                State::Idle => None,
            },
            Token::HeaderStart => {
                self.header_arrays += 1;
                self.header_items = 0;
                None
            }
            Token::HeaderItem(value) => {
                self.header_items += 1;
                // first value of the first header array is the list date
                if self.header_arrays == 1 && self.header_items == 1 {
                    parse_list_date(&value).map(Decoded::Published)
                } else {
                    None
                }
            }
            Token::HeaderEnd => None,
        }
    }
}

/// Parses the `dd.mm.YYYY, HH:MM` publication date of a film list.
pub fn parse_list_date(value: &str) -> Option<NaiveDateTime> {
    match NaiveDateTime::parse_from_str(value, "%d.%m.%Y, %H:%M") {
        Ok(date) => Some(date),
        Err(e) => {
            debug!("Could not determine date \"{}\" of film list: {}", value, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn collect_tokens(json: &str) -> Result<(Vec<Token>, ControlFlow<()>), SyncError> {
        let mut tokens = Vec::new();
        let flow = TokenReader::new(json.as_bytes(), "test.json").for_each(|token| {
            tokens.push(token);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok((tokens, flow))
    }

    fn decode_all(json: &str) -> Vec<Decoded> {
        let mut decoder = RecordDecoder::new();
        let mut out = Vec::new();
        TokenReader::new(json.as_bytes(), "test.json")
            .for_each(|token| {
                out.extend(decoder.feed(token));
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        out
    }

    fn records(decoded: Vec<Decoded>) -> Vec<CatalogRecord> {
        decoded
            .into_iter()
            .filter_map(|d| match d {
                Decoded::Record(r) => Some(r),
                Decoded::Published(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_tokenizes_duplicate_keys_and_skips_unknown() {
        let json = r#"{"Filmliste":["a"],"Other":{"x":[1,2]},"X":[" ARD ",null,7],"X":[]}"#;
        let (tokens, flow) = collect_tokens(json).unwrap();
        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(
            tokens,
            vec![
                Token::HeaderStart,
                Token::HeaderItem("a".into()),
                Token::HeaderEnd,
                Token::RecordStart,
                Token::RecordItem("ARD".into()),
                Token::RecordItem("".into()),
                Token::RecordItem("7".into()),
                Token::RecordEnd,
                Token::RecordStart,
                Token::RecordEnd,
            ]
        );
    }

    #[test]
    fn test_handler_can_stop_stream() {
        let json = r#"{"X":["a"],"X":["b"],"X":["c"]}"#;
        let mut starts = 0;
        let flow = TokenReader::new(json.as_bytes(), "test.json")
            .for_each(|token| {
                if token == Token::RecordStart {
                    starts += 1;
                    if starts == 2 {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        assert_eq!(flow, ControlFlow::Break(()));
        assert_eq!(starts, 2);
    }

    #[test]
    fn test_handler_error_is_returned_unchanged() {
        let json = r#"{"X":["a"]}"#;
        let result = TokenReader::new(json.as_bytes(), "test.json")
            .for_each(|_| Err(SyncError::DownloadFailed("boom".into())));
        assert!(matches!(result, Err(SyncError::DownloadFailed(m)) if m == "boom"));
    }

    #[test]
    fn test_truncated_document_is_stream_error() {
        let result = collect_tokens(r#"{"X":["a","b""#);
        assert!(matches!(result, Err(SyncError::StreamIo { .. })));
    }

    struct FailingReader {
        data: io::Cursor<Vec<u8>>,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "disk gone")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn test_read_error_is_stream_error() {
        let reader = FailingReader {
            data: io::Cursor::new(br#"{"X":["a"],"X":["#.to_vec()),
        };
        let result = TokenReader::new(reader, "broken.json")
            .for_each(|_| Ok(ControlFlow::Continue(())));
        match result {
            Err(SyncError::StreamIo { path, source }) => {
                assert_eq!(path, PathBuf::from("broken.json"));
                assert!(source.is_io());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_record_fields_decoded_by_position() {
        let json = r#"{"X":["ARD","Tagesschau","20 Uhr","01.02.2020","20:00:00","00:15:00","120",
            "Nachrichten","http://ard.example/ts/20uhr.mp4","http://ard.example/ts","",
            "","22|20uhr_sd.mp4","","22|20uhr_hd.mp4","","1580583600","","DE"]}"#;
        let records = records(decode_all(json));
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.channel, "ARD");
        assert_eq!(r.show, "Tagesschau");
        assert_eq!(r.title, "20 Uhr");
        assert_eq!(r.aired.to_string(), "2020-02-01 20:00:00");
        assert_eq!(r.duration, Some(900));
        assert_eq!(r.size, 120);
        assert_eq!(r.description, "Nachrichten");
        assert_eq!(r.url_video, "http://ard.example/ts/20uhr.mp4");
        assert_eq!(r.website, "http://ard.example/ts");
        assert_eq!(r.url_video_sd, "http://ard.example/ts/20uhr_sd.mp4");
        assert_eq!(r.url_video_hd, "http://ard.example/ts/20uhr_hd.mp4");
        assert_eq!(r.aired_epoch, 1580583600);
        assert_eq!(r.geo, "DE");
    }

    #[test]
    fn test_record_isolation() {
        let json = r#"{"X":["ARD","Show","A","01.02.2020"],"X":["ZDF"]}"#;
        let records = records(decode_all(json));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "A");
        assert_eq!(records[1].channel, "ZDF");
        assert_eq!(records[1].show, "");
        assert_eq!(records[1].title, "");
        assert_eq!(records[1], CatalogRecord {
            channel: "ZDF".into(),
            ..CatalogRecord::default()
        });
    }

    #[test]
    fn test_header_date_is_published() {
        let json = r#"{"Filmliste":["01.02.2020, 10:30","01.02.2020, 09:30","3"],
            "Filmliste":["Sender","Thema"],"X":["ARD"]}"#;
        let decoded = decode_all(json);
        let expected = NaiveDateTime::parse_from_str("2020-02-01 10:30", "%Y-%m-%d %H:%M").unwrap();
        assert_eq!(decoded[0], Decoded::Published(expected));
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_items_outside_record_are_ignored() {
        let mut decoder = RecordDecoder::new();
        assert!(decoder.feed(Token::RecordItem("stray".into())).is_none());
        assert!(decoder.feed(Token::RecordEnd).is_none());
        assert!(decoder.is_idle());

        decoder.feed(Token::RecordStart);
        assert!(!decoder.is_idle());
        let decoded = decoder.feed(Token::RecordEnd);
        assert_eq!(decoded, Some(Decoded::Record(CatalogRecord::default())));
        assert!(decoder.is_idle());
    }
}
