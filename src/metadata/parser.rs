//! Byte cursor for signature blobs.
//!
//! [`Parser`] walks a borrowed byte slice, bounds-checking every read and decoding the
//! compressed integer and `TypeDefOrRefOrSpecEncoded` token formats used throughout
//! ECMA-335 signatures (II.23.2). The cursor position doubles as the byte offset into the
//! blob, which is how [`crate::boxing::SignatureDecoder`] records exact sub-signature ranges.
//!
//! # Examples
//!
//! ```rust
//! use dotcapture::Parser;
//!
//! let blob = [0x20, 0x80, 0x95, 0x49];
//! let mut parser = Parser::new(&blob);
//!
//! assert_eq!(parser.read_u8()?, 0x20);
//! assert_eq!(parser.read_compressed_uint()?, 0x95);
//! assert_eq!(parser.pos(), 3);
//! # Ok::<(), dotcapture::Error>(())
//! ```

use crate::{
    metadata::token::{Token, TABLE_TYPEDEF, TABLE_TYPEREF, TABLE_TYPESPEC},
    Result,
};

/// A bounds-checked cursor over a signature blob.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new `Parser` from a byte slice
    ///
    /// ## Arguments
    /// * 'data' - The byte slice to read from
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying slice
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the underlying slice is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true while unread bytes remain
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current offset from the start of the blob
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move forward by one byte
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the cursor is already at the end.
    pub fn advance(&mut self) -> Result<()> {
        if self.position >= self.data.len() {
            return Err(out_of_bounds_error!());
        }
        self.position += 1;
        Ok(())
    }

    /// Look at the current byte without consuming it
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if no bytes remain.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(out_of_bounds_error!())
    }

    /// Read a single byte
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if no bytes remain.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.peek_byte()?;
        self.position += 1;
        Ok(value)
    }

    /// Read a compressed unsigned integer (II.23.2)
    ///
    /// # Errors
    /// Returns an error on truncated input or an invalid length prefix.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_u8()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = u32::from(self.read_u8()?);
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | second_byte);
        }

        // 4-byte encoding: 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let mut value = u32::from(first_byte) & 0x1F;
            for _ in 0..3 {
                value = (value << 8) | u32::from(self.read_u8()?);
            }
            return Ok(value);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed `TypeDefOrRefOrSpecEncoded` token (II.23.2.8)
    ///
    /// # Errors
    /// Returns an error on truncated input or when the table tag is invalid.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table = match compressed_token & 0x3 {
            0x0 => TABLE_TYPEDEF,
            0x1 => TABLE_TYPEREF,
            0x2 => TABLE_TYPESPEC,
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::from_parts(table, compressed_token >> 2))
    }
}
