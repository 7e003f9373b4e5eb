//! Cache Client
//!
//! Blocking client for the cache protocol, used by the CLI and tests.

use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::key::{FileType, VersionKey};
use crate::protocol::{
    decode_version, encode_version, write_command, Command, ResponseHeader, PROTOCOL_VERSION,
    VERSION_SIZE,
};

/// A connected client
pub struct CacheClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl CacheClient {
    /// Connect and perform the version handshake
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::connect_with_version(addr, PROTOCOL_VERSION)
    }

    /// Connect announcing an arbitrary protocol version
    pub fn connect_with_version<A: ToSocketAddrs>(addr: A, version: u32) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;

        let mut client = Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        };

        client.writer.write_all(&encode_version(version))?;
        client.writer.flush()?;

        let mut echo = [0u8; VERSION_SIZE];
        client.reader.read_exact(&mut echo)?;
        let accepted = decode_version(&echo);
        if accepted != version {
            return Err(CacheError::VersionMismatch {
                expected: version,
                actual: accepted,
            });
        }
        Ok(client)
    }

    /// Set a read timeout on responses
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn begin_transaction(&mut self, key: &VersionKey) -> Result<()> {
        write_command(&mut self.writer, &Command::TransactionStart { key: *key })
    }

    /// Upload one file of the open transaction
    pub fn put(&mut self, file_type: FileType, data: &[u8]) -> Result<()> {
        write_command(
            &mut self.writer,
            &Command::Put {
                file_type,
                size: data.len() as u64,
            },
        )?;
        self.writer.write_all(data)?;
        Ok(())
    }

    pub fn end_transaction(&mut self) -> Result<()> {
        write_command(&mut self.writer, &Command::TransactionEnd)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Upload a whole version in one transaction
    pub fn put_version(&mut self, key: &VersionKey, files: &[(FileType, &[u8])]) -> Result<()> {
        self.begin_transaction(key)?;
        for (file_type, data) in files {
            self.put(*file_type, data)?;
        }
        self.end_transaction()
    }

    /// Queue a get without waiting for its response
    pub fn request(&mut self, file_type: FileType, key: &VersionKey) -> Result<()> {
        write_command(
            &mut self.writer,
            &Command::Get {
                file_type,
                key: *key,
            },
        )
    }

    /// Read the next response; `None` for a miss
    pub fn read_response(&mut self) -> Result<(ResponseHeader, Option<Vec<u8>>)> {
        self.writer.flush()?;
        let header = ResponseHeader::read_from(&mut self.reader)?;
        match header {
            ResponseHeader::Found { size, .. } => {
                let len = usize::try_from(size).map_err(|_| {
                    CacheError::Protocol(format!("response of {} bytes is too large", size))
                })?;
                let mut data = vec![0u8; len];
                self.reader.read_exact(&mut data)?;
                Ok((header, Some(data)))
            }
            ResponseHeader::NotFound { .. } => Ok((header, None)),
        }
    }

    /// Fetch one file
    pub fn get(&mut self, file_type: FileType, key: &VersionKey) -> Result<Option<Vec<u8>>> {
        self.request(file_type, key)?;
        let (header, data) = self.read_response()?;
        let (got_type, got_key) = match header {
            ResponseHeader::Found { file_type, key, .. } => (file_type, key),
            ResponseHeader::NotFound { file_type, key } => (file_type, key),
        };
        if got_type != file_type || got_key != *key {
            return Err(CacheError::Protocol(format!(
                "response for {}-{} while waiting for {}-{}",
                got_key, got_type, key, file_type
            )));
        }
        Ok(data)
    }

    /// Say goodbye and close the connection
    pub fn quit(mut self) -> Result<()> {
        write_command(&mut self.writer, &Command::Quit)?;
        self.writer.flush()?;
        Ok(())
    }
}
