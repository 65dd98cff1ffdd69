use nom::bytes::streaming::take;
use nom::combinator::flat_map;
use nom::Err as NomErr;
use nom::IResult;
use nom::number::streaming::be_u32;
use std::fs::File;
use std::io::{Error as IoError, Read, Seek, SeekFrom, Write};

#[derive(Debug, PartialEq)]
pub enum FrameError {
    MaximumSizeReached,
}

/// Encode an entry as a self-contained frame: the size of the entry (on 4 bytes, as big-endian)
/// followed by the entry itself.
pub fn encode(entry: &[u8]) -> Result<Vec<u8>, FrameError> {
    if entry.len() > u32::MAX as usize {
        return Err(FrameError::MaximumSizeReached);
    };
    let mut encoded = Vec::with_capacity(4 + entry.len());
    encoded.extend(&(entry.len() as u32).to_be_bytes());
    encoded.extend(entry);

    Ok(encoded)
}

#[derive(Debug, PartialEq)]
pub enum ParseError<'a> {
    CorruptedContent,
    Incomplete(Vec<Vec<u8>>, &'a [u8]),
}

/// Parse the frames of the given input. If the input ends in the middle of a frame, return a
/// ParseError::Incomplete with the frames parsed so far and the input left.
pub fn parse(input: &[u8]) -> Result<Vec<Vec<u8>>, ParseError<'_>> {
    let mut entries = Vec::new();
    let mut input = input;

    while !input.is_empty() {
        match frame(input) {
            Ok((input_left, entry)) => {
                entries.push(entry.to_vec());
                input = input_left;
            },
            Err(NomErr::Incomplete(_)) => return Err(ParseError::Incomplete(entries, input)),
            Err(_) => return Err(ParseError::CorruptedContent),
        };
    };

    Ok(entries)
}

fn frame(input: &[u8]) -> IResult<&[u8], &[u8]> {
    flat_map(be_u32, take)(input)
}

#[derive(Debug)]
pub enum ReadError {
    CorruptedFile,
    UnreadableFile(IoError),
}

impl From<IoError> for ReadError {
    fn from(error: IoError) -> Self {
        Self::UnreadableFile(error)
    }
}

/// Read frames from files.
pub struct Reader<'a> {
    file: &'a mut File,
}

impl<'a> Reader<'a> {
    /// Create a new frame reader on the given open file.
    pub fn new(file: &'a mut File) -> Self {
        Self { file }
    }

    /// Read all entries of the file. A file ending in the middle of an entry is corrupted.
    pub fn all(&mut self) -> Result<Vec<Vec<u8>>, ReadError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut content = Vec::new();
        self.file.read_to_end(&mut content)?;

        match parse(&content) {
            Ok(entries) => Ok(entries),
            Err(ParseError::Incomplete(_, _)) | Err(ParseError::CorruptedContent) => Err(ReadError::CorruptedFile),
        }
    }
}

#[derive(Debug)]
pub enum WriteError {
    InvalidData,
    WriteFailure(IoError),
}

impl From<IoError> for WriteError {
    fn from(error: IoError) -> Self {
        Self::WriteFailure(error)
    }
}

/// Write frames to files.
pub struct Writer<'a> {
    file: &'a mut File,
}

impl<'a> Writer<'a> {
    /// Create a new frame writer on the given open file. The file should be open with write
    /// privileges.
    pub fn new(file: &'a mut File) -> Self {
        Self { file }
    }

    /// Write the given entry at the current cursor position.
    pub fn write(&mut self, entry: &[u8]) -> Result<(), WriteError> {
        let frame = encode(entry).map_err(|_| WriteError::InvalidData)?;
        self.file.write_all(&frame)?;

        Ok(())
    }

    /// Synchronize data previously written, making sure they are properly written on disk.
    pub fn sync(&mut self) -> Result<(), WriteError> {
        self.file.sync_all()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    #[test]
    fn encode_frames() {
        assert_eq!(encode(&[]), Ok(vec![0, 0, 0, 0]));
        assert_eq!(encode(&[7, 8]), Ok(vec![0, 0, 0, 2, 7, 8]));
    }

    #[test]
    fn parse_frames() {
        assert_eq!(parse(&[0, 0, 0, 1, 0, 0, 0, 0, 1, 1]), Ok(vec![vec![0], vec![1]]));
        assert_eq!(parse(&[0, 0, 0, 0]), Ok(vec![vec![]]));
        assert_eq!(parse(&[0, 0]), Err(ParseError::Incomplete(vec![], &[0, 0])));
        assert_eq!(
            parse(&[0, 0, 0, 1, 5, 0, 0, 0, 3, 1]),
            Err(ParseError::Incomplete(vec![vec![5]], &[0, 0, 0, 3, 1])),
        );
    }

    #[test]
    fn write_then_read_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("frames");
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(&path).unwrap();

        let mut writer = Writer::new(&mut file);
        writer.write(&[1, 2, 3]).unwrap();
        writer.write(&vec![9; 10000]).unwrap();
        writer.sync().unwrap();

        let entries = Reader::new(&mut file).all().unwrap();
        assert_eq!(entries, vec![vec![1, 2, 3], vec![9; 10000]]);
    }

    #[test]
    fn read_truncated_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("frames");
        std::fs::write(&path, &[0u8, 0, 0, 4, 1, 2]).unwrap();
        let mut file = File::open(&path).unwrap();

        match Reader::new(&mut file).all() {
            Err(ReadError::CorruptedFile) => {},
            other => panic!("unexpected result {:?}", other),
        };
    }
}
