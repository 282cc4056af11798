//! Mirror Service Discovery
//!
//! The audio sync L2CAP channel is found through SDP. Each earbud registers a
//! service record carrying the mirror service UUID and the PSM it listens on,
//! and searches the peer for the same record to learn the remote PSM.
//!
//! Records, search patterns and attribute lists are encoded as SDP data
//! elements: a type/size descriptor byte, an optional length, then the value.

/// 128-bit UUID of the mirror service (`0000eb07-d102-11e1-9b23-00025b00a5a5`)
pub const MIRROR_SERVICE_UUID: u128 = 0x0000_eb07_d102_11e1_9b23_0002_5b00_a5a5;

/// 16-bit UUID of the L2CAP protocol
pub const L2CAP_PROTOCOL_UUID: u16 = 0x0100;

/// Service Class ID List attribute
pub const SERVICE_CLASS_ID_LIST: u16 = 0x0001;

/// Protocol Descriptor List attribute
pub const PROTOCOL_DESCRIPTOR_LIST: u16 = 0x0004;

/// Size of the encoded mirror service record
pub const SERVICE_RECORD_SIZE: usize = 35;

/// Offset of the big-endian PSM within the encoded service record
pub const SERVICE_RECORD_PSM_OFFSET: usize = 33;

/// Bluetooth Base UUID with the 32-bit alias field zeroed
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

const UINT16: u8 = 0x09;
const UUID16: u8 = 0x19;
const UUID128: u8 = 0x1C;
const SEQUENCE_U8: u8 = 0x35;

/// Service search pattern matching the mirror service
pub const SERVICE_SEARCH_PATTERN: [u8; 19] = {
    let uuid = MIRROR_SERVICE_UUID.to_be_bytes();
    let mut pattern = [0u8; 19];
    pattern[0] = SEQUENCE_U8;
    pattern[1] = 17;
    pattern[2] = UUID128;
    let mut i = 0;
    while i < 16 {
        pattern[3 + i] = uuid[i];
        i += 1;
    }
    pattern
};

/// Attribute list requesting only the protocol descriptor list
pub const PROTOCOL_ATTRIBUTE_LIST: [u8; 5] = [
    SEQUENCE_U8,
    3,
    UINT16,
    (PROTOCOL_DESCRIPTOR_LIST >> 8) as u8,
    PROTOCOL_DESCRIPTOR_LIST as u8,
];

/// Outcome of a service search attribute request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdpSearchStatus {
    /// Matching record found, attributes attached
    Success,
    /// The peer has no matching record
    NoResponseData,
    /// Any other failure (timeout, link loss, malformed response)
    Error(u16),
}

/// Data element type descriptor (upper five bits of the header byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataElementType {
    Nil,
    UnsignedInt,
    SignedInt,
    Uuid,
    TextString,
    Boolean,
    Sequence,
    Alternative,
    Url,
}

impl DataElementType {
    const fn from_header(header: u8) -> Option<Self> {
        match header >> 3 {
            0 => Some(Self::Nil),
            1 => Some(Self::UnsignedInt),
            2 => Some(Self::SignedInt),
            3 => Some(Self::Uuid),
            4 => Some(Self::TextString),
            5 => Some(Self::Boolean),
            6 => Some(Self::Sequence),
            7 => Some(Self::Alternative),
            8 => Some(Self::Url),
            _ => None,
        }
    }
}

/// One decoded data element, borrowing its value bytes
#[derive(Debug, Clone, Copy)]
struct DataElement<'a> {
    kind: DataElementType,
    value: &'a [u8],
}

impl<'a> DataElement<'a> {
    /// Decode the element at the start of `data`, returning it and the rest
    fn parse(data: &'a [u8]) -> Option<(Self, &'a [u8])> {
        let (&header, rest) = data.split_first()?;
        let kind = DataElementType::from_header(header)?;
        let (length, rest) = match header & 0x07 {
            0 if kind == DataElementType::Nil => (0, rest),
            0 => (1, rest),
            1 => (2, rest),
            2 => (4, rest),
            3 => (8, rest),
            4 => (16, rest),
            5 => {
                let (&len, rest) = rest.split_first()?;
                (usize::from(len), rest)
            }
            6 => {
                let len = rest.get(..2)?;
                (usize::from(u16::from_be_bytes([len[0], len[1]])), &rest[2..])
            }
            _ => {
                let len = rest.get(..4)?;
                let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]);
                (usize::try_from(len).ok()?, &rest[4..])
            }
        };
        if rest.len() < length {
            return None;
        }
        let (value, rest) = rest.split_at(length);
        Some((Self { kind, value }, rest))
    }

    fn as_uint(&self) -> Option<u32> {
        if self.kind != DataElementType::UnsignedInt {
            return None;
        }
        match *self.value {
            [b] => Some(u32::from(b)),
            [a, b] => Some(u32::from(u16::from_be_bytes([a, b]))),
            [a, b, c, d] => Some(u32::from_be_bytes([a, b, c, d])),
            _ => None,
        }
    }

    fn as_uuid(&self) -> Option<u128> {
        if self.kind != DataElementType::Uuid {
            return None;
        }
        match *self.value {
            [a, b] => Some(BLUETOOTH_BASE_UUID | (u128::from(u16::from_be_bytes([a, b])) << 96)),
            [a, b, c, d] => {
                Some(BLUETOOTH_BASE_UUID | (u128::from(u32::from_be_bytes([a, b, c, d])) << 96))
            }
            _ => {
                let bytes: [u8; 16] = self.value.try_into().ok()?;
                Some(u128::from_be_bytes(bytes))
            }
        }
    }

    fn sequence(&self) -> Option<Elements<'a>> {
        match self.kind {
            DataElementType::Sequence | DataElementType::Alternative => Some(Elements {
                data: self.value,
            }),
            _ => None,
        }
    }
}

/// Iterator over the elements of a sequence
struct Elements<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for Elements<'a> {
    type Item = DataElement<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        match DataElement::parse(self.data) {
            Some((element, rest)) => {
                self.data = rest;
                Some(element)
            }
            None => {
                self.data = &[];
                None
            }
        }
    }
}

/// Encode the mirror service record for the PSM this device listens on
#[must_use]
pub fn service_record(local_psm: u16) -> [u8; SERVICE_RECORD_SIZE] {
    let mut record = [0u8; SERVICE_RECORD_SIZE];
    let uuid = MIRROR_SERVICE_UUID.to_be_bytes();
    let [class_hi, class_lo] = SERVICE_CLASS_ID_LIST.to_be_bytes();
    let [pdl_hi, pdl_lo] = PROTOCOL_DESCRIPTOR_LIST.to_be_bytes();
    let [l2cap_hi, l2cap_lo] = L2CAP_PROTOCOL_UUID.to_be_bytes();

    record[..5].copy_from_slice(&[UINT16, class_hi, class_lo, SEQUENCE_U8, 17]);
    record[5] = UUID128;
    record[6..22].copy_from_slice(&uuid);
    record[22..SERVICE_RECORD_PSM_OFFSET].copy_from_slice(&[
        UINT16,
        pdl_hi,
        pdl_lo,
        SEQUENCE_U8,
        8,
        SEQUENCE_U8,
        6,
        UUID16,
        l2cap_hi,
        l2cap_lo,
        UINT16,
    ]);
    record[SERVICE_RECORD_PSM_OFFSET..].copy_from_slice(&local_psm.to_be_bytes());
    record
}

/// Find the L2CAP PSM in a service search attribute response
///
/// `attributes` is the attribute list returned by the peer, either bare
/// (`id, value, id, value, ...`) or wrapped in one or more sequences. Returns
/// the PSM of the first L2CAP entry of the protocol descriptor list.
#[must_use]
pub fn find_l2cap_psm(attributes: &[u8]) -> Option<u16> {
    let mut list = Elements { data: attributes };
    loop {
        let first = DataElement::parse(list.data)?.0;
        match first.sequence() {
            Some(inner) => list = inner,
            None => break,
        }
    }

    while let Some(id) = list.next() {
        let value = list.next()?;
        if id.as_uint() != Some(u32::from(PROTOCOL_DESCRIPTOR_LIST)) {
            continue;
        }
        for protocol in value.sequence()? {
            let mut parts = protocol.sequence()?;
            let is_l2cap = parts.next().and_then(|uuid| uuid.as_uuid())
                == Some(BLUETOOTH_BASE_UUID | (u128::from(L2CAP_PROTOCOL_UUID) << 96));
            if !is_l2cap {
                continue;
            }
            return parts
                .next()
                .and_then(|psm| psm.as_uint())
                .and_then(|psm| u16::try_from(psm).ok());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_record_layout() {
        let record = service_record(0x1041);
        assert_eq!(&record[..3], &[0x09, 0x00, 0x01]);
        assert_eq!(&record[3..6], &[0x35, 0x11, 0x1C]);
        assert_eq!(&record[6..22], &MIRROR_SERVICE_UUID.to_be_bytes());
        assert_eq!(&record[22..25], &[0x09, 0x00, 0x04]);
        assert_eq!(record[SERVICE_RECORD_PSM_OFFSET], 0x10);
        assert_eq!(record[SERVICE_RECORD_PSM_OFFSET + 1], 0x41);
    }

    #[test]
    fn test_search_pattern_and_attribute_list() {
        assert_eq!(&SERVICE_SEARCH_PATTERN[..3], &[0x35, 0x11, 0x1C]);
        assert_eq!(
            &SERVICE_SEARCH_PATTERN[3..],
            &[
                0x00, 0x00, 0xeb, 0x07, 0xd1, 0x02, 0x11, 0xe1, 0x9b, 0x23, 0x00, 0x02, 0x5b,
                0x00, 0xa5, 0xa5
            ]
        );
        assert_eq!(PROTOCOL_ATTRIBUTE_LIST, [0x35, 0x03, 0x09, 0x00, 0x04]);
    }

    #[test]
    fn test_find_psm_in_own_record() {
        let record = service_record(0x0021);
        assert_eq!(find_l2cap_psm(&record), Some(0x0021));
    }

    #[test]
    fn test_find_psm_in_wrapped_response() {
        // seq { seq { 0x0004: seq { seq { L2CAP, 0x1043 } } } }
        let response = [
            0x35, 0x0F, 0x35, 0x0D, 0x09, 0x00, 0x04, 0x35, 0x08, 0x35, 0x06, 0x19, 0x01, 0x00,
            0x09, 0x10, 0x43,
        ];
        assert_eq!(find_l2cap_psm(&response), Some(0x1043));
    }

    #[test]
    fn test_find_psm_skips_other_protocols() {
        // 0x0004: seq { seq { RFCOMM(0x0003), 5 }, seq { L2CAP, 0x0019 } }
        let response = [
            0x09, 0x00, 0x04, 0x35, 0x0F, 0x35, 0x05, 0x19, 0x00, 0x03, 0x08, 0x05, 0x35, 0x06,
            0x19, 0x01, 0x00, 0x09, 0x00, 0x19,
        ];
        assert_eq!(find_l2cap_psm(&response), Some(0x0019));
    }

    #[test]
    fn test_find_psm_missing_or_truncated() {
        assert_eq!(find_l2cap_psm(&[]), None);

        // Only a service class list
        let record = service_record(0x0021);
        assert_eq!(find_l2cap_psm(&record[..22]), None);

        // PSM cut short
        assert_eq!(find_l2cap_psm(&record[..34]), None);
    }
}
