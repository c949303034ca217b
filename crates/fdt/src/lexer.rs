//! Tokenizer for the FDT structure block.
//!
//! The structure block encodes the devicetree as a flat stream of
//! 4-byte-aligned tokens. [`TokenLexer`] walks that stream and yields
//! [`Token`]s with their payload resolved: node names read in place,
//! property names looked up in the strings block, property values sliced
//! out of the blob. Nothing is copied.

use core::{iter::FusedIterator, str::Utf8Error};

use snafu::{OptionExt as _, ResultExt as _, Snafu};

use crate::{
    Fdt,
    layout::{PropHeader, StructToken},
};

/// Errors from walking the structure block.
#[derive(Debug, Clone, Snafu)]
pub enum LexError {
    #[snafu(display("unknown token {token:#x} at offset {offset}"))]
    UnknownToken {
        token: u32,
        offset: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("structure block ends inside an element at offset {offset}"))]
    TruncatedStructBlock {
        offset: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("missing property header at offset {offset}"))]
    MissingPropHeader {
        offset: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("invalid node name at offset {offset}"))]
    InvalidNodeName {
        offset: usize,
        #[snafu(source)]
        source: Utf8Error,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(display("invalid property name at strings offset {offset}"))]
    InvalidPropName {
        offset: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// One structure-block element with its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'blob> {
    /// Start of a node; the name still carries its unit address suffix.
    BeginNode { name: &'blob str },
    /// End of the current node.
    EndNode,
    /// A property of the current node.
    Prop { name: &'blob str, value: &'blob [u8] },
    /// Padding token.
    Nop,
    /// End of the structure block.
    End,
}

/// Iterator over the structure block of a devicetree.
#[derive(Debug, Clone)]
pub struct TokenLexer<'blob, 'tree> {
    fdt: &'tree Fdt<'blob>,
    offset: usize,
}

impl<'blob, 'tree> TokenLexer<'blob, 'tree> {
    pub(crate) fn new(fdt: &'tree Fdt<'blob>) -> Self {
        Self { fdt, offset: 0 }
    }
}

impl<'blob> Iterator for TokenLexer<'blob, '_> {
    type Item = Result<Token<'blob>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_token().transpose()
    }
}

impl FusedIterator for TokenLexer<'_, '_> {}

impl<'blob> TokenLexer<'blob, '_> {
    fn read_token(&mut self) -> Result<Option<Token<'blob>>, LexError> {
        debug_assert!(self.offset.is_multiple_of(align_of::<StructToken>()));
        let Some(token) = self.fdt.struct_block.try_get::<StructToken>(self.offset) else {
            return Ok(None);
        };
        let token_offset = self.offset;
        self.offset += size_of::<StructToken>();

        let token = match token.0.read() {
            StructToken::BEGIN_NODE => {
                let name = self.read_node_name()?;
                self.skip_padding();
                Token::BeginNode { name }
            }
            StructToken::END_NODE => Token::EndNode,
            StructToken::PROP => {
                let header = self.read_prop_header()?;
                let name = self.read_prop_name(header.nameoff.read() as usize)?;
                let value = self.read_value(header.len.read() as usize)?;
                self.skip_padding();
                Token::Prop { name, value }
            }
            StructToken::NOP => Token::Nop,
            StructToken::END => Token::End,
            token => {
                return UnknownTokenSnafu {
                    token,
                    offset: token_offset,
                }
                .fail();
            }
        };

        Ok(Some(token))
    }

    fn read_prop_header(&mut self) -> Result<PropHeader, LexError> {
        let offset = self.offset;
        let header = self
            .fdt
            .struct_block
            .try_get::<PropHeader>(offset)
            .context(MissingPropHeaderSnafu { offset })?;
        self.offset += size_of::<PropHeader>();
        Ok(*header)
    }

    fn read_node_name(&mut self) -> Result<&'blob str, LexError> {
        let offset = self.offset;
        let bytes = self.fdt.struct_block[offset..].as_ref();
        let len = bytes
            .iter()
            .position(|&b| b == 0)
            .context(TruncatedStructBlockSnafu { offset })?;
        self.offset += len + 1;
        str::from_utf8(&bytes[..len]).context(InvalidNodeNameSnafu { offset })
    }

    fn read_prop_name(&self, nameoff: usize) -> Result<&'blob str, LexError> {
        let bytes = self
            .fdt
            .string_block
            .get(nameoff..)
            .context(InvalidPropNameSnafu { offset: nameoff })?;
        let len = bytes
            .iter()
            .position(|&b| b == 0)
            .context(InvalidPropNameSnafu { offset: nameoff })?;
        str::from_utf8(&bytes[..len])
            .ok()
            .context(InvalidPropNameSnafu { offset: nameoff })
    }

    fn read_value(&mut self, len: usize) -> Result<&'blob [u8], LexError> {
        let offset = self.offset;
        let value = self
            .fdt
            .struct_block
            .try_slice::<u8>(offset, len)
            .context(TruncatedStructBlockSnafu { offset })?;
        self.offset += len;
        Ok(value)
    }

    fn skip_padding(&mut self) {
        self.offset = self.offset.next_multiple_of(align_of::<StructToken>());
    }
}
