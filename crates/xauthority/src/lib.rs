//! Binary encoding of X authority records (the `.Xauthority` / `Xauthority`
//! file format described by `Xau.h`'s `Xauth` struct): a 2-byte big-endian
//! family code followed by four length-prefixed byte strings (address,
//! display number, protocol name, auth data).
//!
//! The teacher shelled out to the `xauth` binary to populate this file; here
//! it is written directly, the way a library rather than a login manager
//! script would do it.

use std::io::{self, Write};

use rand::RngCore;

/// `FamilyLocal` from `Xauth` -- used for cookies scoped to a local Unix
/// socket connection, which is what a locally-spawned X server listens on.
pub const FAMILY_LOCAL: u16 = 256;

const MIT_MAGIC_COOKIE_1: &[u8] = b"MIT-MAGIC-COOKIE-1";
const COOKIE_BYTES: usize = 16;

/// One authority entry: the address/display-number/protocol-name triple the
/// X server matches an incoming connection against, plus the cookie data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityRecord {
    pub family: u16,
    pub address: Vec<u8>,
    pub number: Vec<u8>,
    pub name: Vec<u8>,
    pub data: Vec<u8>,
}

impl AuthorityRecord {
    /// Serialise this record in the on-disk `Xauth` layout.
    pub fn encode_to(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&self.family.to_be_bytes())?;
        write_field(out, &self.address)?;
        write_field(out, &self.number)?;
        write_field(out, &self.name)?;
        write_field(out, &self.data)?;
        Ok(())
    }

    /// Serialise to an in-memory buffer; convenience for tests and for
    /// callers that want to checksum before writing.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf).expect("writing to a Vec never fails");
        buf
    }
}

fn write_field(out: &mut impl Write, field: &[u8]) -> io::Result<()> {
    let len: u16 = field
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "authority field too long"))?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(field)
}

/// Produces `AuthorityRecord`s for a given address/display-number pair.
/// Abstracted as a trait so callers (and tests) can substitute a fixed-cookie
/// implementation; the core only depends on this trait, never on `rand`
/// directly.
pub trait AuthorityEncoder {
    fn generate(&self, address: &str, display_number: u32) -> AuthorityRecord;
}

/// The only encoder shipped here: MIT-MAGIC-COOKIE-1 with a cryptographically
/// insignificant but unpredictable 128-bit cookie, matching what `xauth
/// generate` and the teacher's `mcookie()` both produce.
#[derive(Default)]
pub struct MitMagicCookieEncoder;

impl AuthorityEncoder for MitMagicCookieEncoder {
    fn generate(&self, address: &str, display_number: u32) -> AuthorityRecord {
        let mut data = [0u8; COOKIE_BYTES];
        rand::thread_rng().fill_bytes(&mut data);
        AuthorityRecord {
            family: FAMILY_LOCAL,
            address: address.as_bytes().to_vec(),
            number: display_number.to_string().into_bytes(),
            name: MIT_MAGIC_COOKIE_1.to_vec(),
            data: data.to_vec(),
        }
    }
}

/// Write `record` to `path`, truncating any existing content -- the "replace
/// mode" the display-server core always uses, never appending a second
/// entry.
pub fn write_authority_file(path: &std::path::Path, record: &AuthorityRecord) -> io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    record.encode_to(&mut file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_field(bytes: &[u8], offset: &mut usize) -> Vec<u8> {
        let len = u16::from_be_bytes([bytes[*offset], bytes[*offset + 1]]) as usize;
        *offset += 2;
        let field = bytes[*offset..*offset + len].to_vec();
        *offset += len;
        field
    }

    #[test]
    fn encode_round_trips_through_manual_decode() {
        let record = MitMagicCookieEncoder.generate("unix/host:0", 0);
        let bytes = record.encode();

        let mut offset = 0;
        let family = u16::from_be_bytes([bytes[0], bytes[1]]);
        offset += 2;
        assert_eq!(family, FAMILY_LOCAL);

        let address = decode_field(&bytes, &mut offset);
        let number = decode_field(&bytes, &mut offset);
        let name = decode_field(&bytes, &mut offset);
        let data = decode_field(&bytes, &mut offset);

        assert_eq!(address, b"unix/host:0");
        assert_eq!(number, b"0");
        assert_eq!(name, MIT_MAGIC_COOKIE_1);
        assert_eq!(data.len(), COOKIE_BYTES);
        assert_eq!(offset, bytes.len());
    }

    #[test]
    fn two_generated_cookies_differ() {
        let encoder = MitMagicCookieEncoder;
        let a = encoder.generate("unix/host:0", 0);
        let b = encoder.generate("unix/host:0", 0);
        assert_ne!(a.data, b.data, "cookies must not repeat across calls");
    }

    #[test]
    fn write_authority_file_truncates_existing_content() {
        let dir = std::env::temp_dir().join(format!("xauthority-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("authority");
        std::fs::write(&path, b"stale content that is much longer than a real record").unwrap();

        let record = MitMagicCookieEncoder.generate("unix/host:1", 1);
        write_authority_file(&path, &record).unwrap();

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(on_disk, record.encode());

        std::fs::remove_dir_all(&dir).ok();
    }
}
