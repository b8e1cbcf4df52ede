//! Solidity ABI encoding for the healthcare contract surface.
//!
//! Only the shapes the contract actually uses are supported: `uint256` values
//! that fit in a `u64`, `address`, `bool`, `string`, arrays and tuples.

use medrec_contracts::{Address, FacilityRef, RawRecord, RawTimestamp};

pub const WORD: usize = 32;

pub const SELECTOR_GET_OWNER: [u8; 4] = [0x89, 0x3d, 0x20, 0xe8];
pub const SELECTOR_AUTHORIZED_USER: [u8; 4] = [0xa6, 0x49, 0x80, 0x32];
pub const SELECTOR_AUTHORIZE_THE_PROVIDER: [u8; 4] = [0x97, 0xad, 0x31, 0x56];
pub const SELECTOR_ADD_PATIENT_RECORD: [u8; 4] = [0xb4, 0x08, 0x35, 0x54];
pub const SELECTOR_FETCH_ALL_RECORDS: [u8; 4] = [0xa6, 0xde, 0xeb, 0xe2];
pub const SELECTOR_GET_HOSPITAL_NAME: [u8; 4] = [0x1b, 0xa3, 0xc1, 0xb6];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(u64),
    Address(Address),
    Bool(bool),
    String(String),
    Array(Vec<Token>),
    Tuple(Vec<Token>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        match self {
            Token::Uint(_) | Token::Address(_) | Token::Bool(_) => false,
            Token::String(_) | Token::Array(_) => true,
            Token::Tuple(items) => items.iter().any(Token::is_dynamic),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiError {
    pub message: String,
}

impl AbiError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AbiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "abi: {}", self.message)
    }
}

impl std::error::Error for AbiError {}

pub fn encode_call(selector: [u8; 4], args: &[Token]) -> Vec<u8> {
    let mut out = selector.to_vec();
    out.extend(encode(args));
    out
}

/// Encodes `tokens` as a tuple: static values inline in the head, dynamic
/// values as head offsets into the tail.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.iter().map(head_size).sum::<usize>();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend(uint_word((head_len + tail.len()) as u64));
            tail.extend(encode_dynamic(token));
        } else {
            head.extend(encode_static(token));
        }
    }

    head.extend(tail);
    head
}

fn head_size(token: &Token) -> usize {
    match token {
        Token::Tuple(items) if !token.is_dynamic() => items.iter().map(head_size).sum(),
        _ => WORD,
    }
}

fn encode_static(token: &Token) -> Vec<u8> {
    match token {
        Token::Uint(v) => uint_word(*v).to_vec(),
        Token::Address(a) => {
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(&a.to_bytes());
            word.to_vec()
        }
        Token::Bool(b) => uint_word(u64::from(*b)).to_vec(),
        Token::Tuple(items) => items.iter().flat_map(encode_static).collect(),
        Token::String(_) | Token::Array(_) => unreachable!("dynamic token in static position"),
    }
}

fn encode_dynamic(token: &Token) -> Vec<u8> {
    match token {
        Token::String(s) => {
            let bytes = s.as_bytes();
            let mut out = uint_word(bytes.len() as u64).to_vec();
            out.extend_from_slice(bytes);
            out.resize(WORD + padded_len(bytes.len()), 0);
            out
        }
        Token::Array(items) => {
            let mut out = uint_word(items.len() as u64).to_vec();
            out.extend(encode(items));
            out
        }
        Token::Tuple(items) => encode(items),
        _ => encode_static(token),
    }
}

fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// Bounds-checked reader over ABI-encoded data. Offsets inside dynamic values
/// are relative to the start of the enclosing tuple, passed as `base`.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn word(&self, at: usize) -> Result<&'a [u8], AbiError> {
        let end = at
            .checked_add(WORD)
            .ok_or_else(|| AbiError::new("offset overflow"))?;
        self.data
            .get(at..end)
            .ok_or_else(|| AbiError::new(format!("word at {} out of bounds", at)))
    }

    pub fn uint_at(&self, at: usize) -> Result<u64, AbiError> {
        let word = self.word(at)?;
        if word[..WORD - 8].iter().any(|b| *b != 0) {
            return Err(AbiError::new(format!("uint at {} exceeds 64 bits", at)));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&word[WORD - 8..]);
        Ok(u64::from_be_bytes(buf))
    }

    /// Like [`Reader::uint_at`], but a value wider than 64 bits is `None`
    /// instead of an error. Out-of-bounds reads are still errors.
    pub fn narrow_uint_at(&self, at: usize) -> Result<Option<u64>, AbiError> {
        let word = self.word(at)?;
        if word[..WORD - 8].iter().any(|b| *b != 0) {
            return Ok(None);
        }
        self.uint_at(at).map(Some)
    }

    fn usize_at(&self, at: usize) -> Result<usize, AbiError> {
        let value = self.uint_at(at)?;
        let value = usize::try_from(value).map_err(|_| AbiError::new("length overflow"))?;
        if value > self.data.len() {
            return Err(AbiError::new(format!("offset or length {} out of bounds", value)));
        }
        Ok(value)
    }

    pub fn address_at(&self, at: usize) -> Result<Address, AbiError> {
        let word = self.word(at)?;
        if word[..12].iter().any(|b| *b != 0) {
            return Err(AbiError::new(format!("address at {} has dirty padding", at)));
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&word[12..]);
        Ok(Address::from_bytes(bytes))
    }

    pub fn bool_at(&self, at: usize) -> Result<bool, AbiError> {
        match self.uint_at(at)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(AbiError::new(format!("bool at {} has value {}", at, other))),
        }
    }

    /// Follows the offset stored at `head` (relative to `base`) and returns
    /// the absolute position of the dynamic value.
    fn follow(&self, base: usize, head: usize) -> Result<usize, AbiError> {
        let offset = self.usize_at(head)?;
        base.checked_add(offset)
            .ok_or_else(|| AbiError::new("offset overflow"))
    }

    pub fn string_at(&self, base: usize, head: usize) -> Result<String, AbiError> {
        let start = self.follow(base, head)?;
        let len = self.usize_at(start)?;
        let body = start + WORD;
        let bytes = self
            .data
            .get(body..body + len)
            .ok_or_else(|| AbiError::new("string body out of bounds"))?;
        String::from_utf8(bytes.to_vec()).map_err(|_| AbiError::new("string is not utf-8"))
    }

    pub fn string_array_at(&self, base: usize, head: usize) -> Result<Vec<String>, AbiError> {
        let start = self.follow(base, head)?;
        let count = self.usize_at(start)?;
        let elements = start + WORD;
        if count.saturating_mul(WORD) > self.data.len().saturating_sub(elements) {
            return Err(AbiError::new("array length out of bounds"));
        }
        (0..count)
            .map(|i| self.string_at(elements, elements + i * WORD))
            .collect()
    }
}

pub fn decode_address(data: &[u8]) -> Result<Address, AbiError> {
    Reader::new(data).address_at(0)
}

pub fn decode_bool(data: &[u8]) -> Result<bool, AbiError> {
    Reader::new(data).bool_at(0)
}

pub fn decode_string(data: &[u8]) -> Result<String, AbiError> {
    Reader::new(data).string_at(0, 0)
}

/// Decodes `(uint256,string,string,string,string[],uint256,uint256)[]`.
pub fn decode_records(data: &[u8]) -> Result<Vec<RawRecord>, AbiError> {
    let reader = Reader::new(data);
    let array = reader.follow(0, 0)?;
    let count = reader.usize_at(array)?;
    let elements = array + WORD;
    if count.saturating_mul(WORD) > data.len().saturating_sub(elements) {
        return Err(AbiError::new("record count out of bounds"));
    }

    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let tuple = reader.follow(elements, elements + i * WORD)?;
        records.push(RawRecord {
            record_key: Some(reader.uint_at(tuple)?),
            patient_name: Some(reader.string_at(tuple, tuple + WORD)?),
            diagnosis: Some(reader.string_at(tuple, tuple + 2 * WORD)?),
            treatment: Some(reader.string_at(tuple, tuple + 3 * WORD)?),
            ipfs_hashes: Some(reader.string_array_at(tuple, tuple + 4 * WORD)?),
            facility_ref: reader.narrow_uint_at(tuple + 5 * WORD)?.map(FacilityRef),
            timestamp: Some(RawTimestamp::Integer(reader.uint_at(tuple + 6 * WORD)?)),
        });
    }
    Ok(records)
}

/// Inverse of [`decode_records`]; absent fields encode as the contract's
/// zero values.
pub fn encode_records(records: &[RawRecord]) -> Vec<u8> {
    let tuples = records
        .iter()
        .map(|r| {
            Token::Tuple(vec![
                Token::Uint(r.record_key.unwrap_or(0)),
                Token::String(r.patient_name.clone().unwrap_or_default()),
                Token::String(r.diagnosis.clone().unwrap_or_default()),
                Token::String(r.treatment.clone().unwrap_or_default()),
                Token::Array(
                    r.ipfs_hashes
                        .clone()
                        .unwrap_or_default()
                        .into_iter()
                        .map(Token::String)
                        .collect(),
                ),
                Token::Uint(r.facility_ref.map(|f| f.0).unwrap_or(0)),
                Token::Uint(match &r.timestamp {
                    Some(RawTimestamp::Integer(secs)) => *secs,
                    Some(RawTimestamp::Numeric(text)) => text.trim().parse().unwrap_or(0),
                    None => 0,
                }),
            ])
        })
        .collect();
    encode(&[Token::Array(tuples)])
}

pub fn decode_hex(input: &str) -> Result<Vec<u8>, AbiError> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(digits).map_err(|_| AbiError::new("payload is not hex"))
}

pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_hex(data: &[u8], index: usize) -> String {
        hex::encode(&data[index * WORD..(index + 1) * WORD])
    }

    #[test]
    fn address_argument_is_left_padded() {
        let addr = Address::parse("0x00000000000000000000000000000000000000ff").expect("valid");
        let call = encode_call(SELECTOR_AUTHORIZED_USER, &[Token::Address(addr)]);
        assert_eq!(&call[..4], &SELECTOR_AUTHORIZED_USER);
        assert_eq!(call.len(), 4 + WORD);
        assert_eq!(
            hex::encode(&call[4..]),
            "00000000000000000000000000000000000000000000000000000000000000ff"
        );
    }

    #[test]
    fn string_and_string_array_follow_head_tail_layout() {
        let data = encode(&[
            Token::Uint(7),
            Token::String("ab".to_string()),
            Token::Array(vec![Token::String("Qa".to_string())]),
        ]);

        // head: uint, offset(string)=0x60, offset(array)=0xa0
        assert_eq!(word_hex(&data, 0), format!("{:0>64}", "7"));
        assert_eq!(word_hex(&data, 1), format!("{:0>64}", "60"));
        assert_eq!(word_hex(&data, 2), format!("{:0>64}", "a0"));
        // string: len=2, "ab" padded
        assert_eq!(word_hex(&data, 3), format!("{:0>64}", "2"));
        assert_eq!(word_hex(&data, 4), format!("{:0<64}", "6162"));
        // array: len=1, offset of element relative to element area=0x20, len=2, "Qa"
        assert_eq!(word_hex(&data, 5), format!("{:0>64}", "1"));
        assert_eq!(word_hex(&data, 6), format!("{:0>64}", "20"));
        assert_eq!(word_hex(&data, 7), format!("{:0>64}", "2"));
        assert_eq!(word_hex(&data, 8), format!("{:0<64}", "5161"));
        assert_eq!(data.len(), 9 * WORD);

        let reader = Reader::new(&data);
        assert_eq!(reader.uint_at(0).expect("uint"), 7);
        assert_eq!(reader.string_at(0, WORD).expect("string"), "ab");
        assert_eq!(
            reader.string_array_at(0, 2 * WORD).expect("array"),
            vec!["Qa".to_string()]
        );
    }

    #[test]
    fn records_decode_what_the_contract_returns() {
        let records = vec![
            RawRecord {
                record_key: Some(1),
                patient_name: Some("John Doe".to_string()),
                diagnosis: Some("Flu".to_string()),
                treatment: Some("Rest".to_string()),
                ipfs_hashes: Some(vec!["Qa".to_string(), "Qb".to_string()]),
                facility_ref: Some(FacilityRef(9)),
                timestamp: Some(RawTimestamp::Integer(1_700_000_000)),
            },
            RawRecord {
                record_key: Some(1),
                patient_name: Some("John Doe".to_string()),
                diagnosis: Some(String::new()),
                treatment: Some("Fluids".to_string()),
                ipfs_hashes: Some(Vec::new()),
                facility_ref: Some(FacilityRef(0)),
                timestamp: Some(RawTimestamp::Integer(1_700_000_500)),
            },
        ];

        let decoded = decode_records(&encode_records(&records)).expect("records decode");
        assert_eq!(decoded, records);
    }

    #[test]
    fn empty_record_array_decodes_to_empty_vec() {
        let data = encode_records(&[]);
        assert!(decode_records(&data).expect("empty decode").is_empty());
    }

    #[test]
    fn legacy_string_payload_does_not_decode_as_records() {
        let legacy = "PatientName: John Doe, Diagnosis: Flu, Timestamp: 1700000000";
        let data = encode(&[Token::String(legacy.to_string())]);
        assert!(decode_records(&data).is_err());
        assert_eq!(decode_string(&data).expect("string decode"), legacy);
    }

    #[test]
    fn truncated_payloads_are_errors_not_panics() {
        let data = encode_records(&[RawRecord {
            record_key: Some(1),
            patient_name: Some("x".repeat(100)),
            ..RawRecord::default()
        }]);
        for cut in [0, 31, 64, 100, data.len() - 1] {
            assert!(decode_records(&data[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn oversized_facility_ref_is_dropped_not_fatal() {
        let mut data = encode_records(&[RawRecord {
            record_key: Some(4),
            patient_name: Some("John Doe".to_string()),
            facility_ref: Some(FacilityRef(3)),
            timestamp: Some(RawTimestamp::Integer(1_700_000_000)),
            ..RawRecord::default()
        }]);
        let elements = 2 * WORD;
        let tuple = elements + Reader::new(&data).uint_at(elements).expect("offset") as usize;
        data[tuple + 5 * WORD] = 1;

        let decoded = decode_records(&data).expect("records decode");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].facility_ref, None);
        assert_eq!(decoded[0].patient_name.as_deref(), Some("John Doe"));
        assert_eq!(
            decoded[0].timestamp,
            Some(RawTimestamp::Integer(1_700_000_000))
        );
    }

    #[test]
    fn oversized_uint_is_rejected() {
        let mut data = vec![0u8; WORD];
        data[0] = 1;
        assert!(Reader::new(&data).uint_at(0).is_err());
    }
}
