use crate::{
    error::{FrameError, FridgeError, Result},
    types::{BoundLayout, Sensors, Settings, StatusReport},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Two magic bytes every frame starts with
pub const PREAMBLE: u16 = 0xFEFE;

/// Keep-alive frame; the fridge answers every ping with a status notification
pub const PING_COMMAND: [u8; 6] = [0xFE, 0xFE, 0x03, 0x01, 0x02, 0x00];

/// Size of the settings block in bytes
pub const SETTINGS_SIZE: usize = 14;

/// Size of the sensor block in bytes
pub const SENSORS_SIZE: usize = 4;

const HEADER_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 2;

/// The frame shapes of the WT-0001 protocol
///
/// Every frame is laid out big-endian as
/// `[preamble:2][data length:1][command code:1][payload...][checksum:2]`,
/// where the data length counts the bytes after the preamble minus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Full state notification from the fridge
    StatusReport,
    /// Replace all user settings
    SetState,
    /// Change only the setpoint
    SetTemp,
    /// Keep-alive
    Ping,
}

impl FrameKind {
    /// Data length byte of this frame kind
    #[must_use]
    pub const fn data_len(self) -> u8 {
        match self {
            Self::StatusReport => 0x15,
            Self::SetState => 0x11,
            Self::SetTemp => 0x04,
            Self::Ping => 0x03,
        }
    }

    /// Command code byte of this frame kind
    #[must_use]
    pub const fn command_code(self) -> u8 {
        match self {
            Self::StatusReport | Self::Ping => 0x01,
            Self::SetState => 0x02,
            Self::SetTemp => 0x05,
        }
    }

    /// Total frame size in bytes
    #[must_use]
    pub const fn frame_len(self) -> usize {
        self.data_len() as usize + 3
    }

    /// Identify a frame by its header bytes
    ///
    /// Only the data length and command code are consulted; the frame still has to go
    /// through [`decode`] to be trusted.
    #[must_use]
    pub fn from_header(data: &[u8]) -> Option<Self> {
        let (&data_len, &code) = (data.get(2)?, data.get(3)?);
        [Self::StatusReport, Self::SetState, Self::SetTemp, Self::Ping]
            .into_iter()
            .find(|kind| kind.data_len() == data_len && kind.command_code() == code)
    }
}

/// KISS checksum: wrapping 16-bit sum of the individual bytes
///
/// Signed fields are summed as their unsigned byte value, booleans as 0/1 and the
/// preamble as two separate bytes, which falls out naturally from summing the encoded
/// frame byte by byte.
#[must_use]
pub fn kiss_checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |sum, &byte| sum.wrapping_add(u16::from(byte)))
}

/// A decoded frame of any kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Status notification
    StatusReport(StatusReport),
    /// Settings write
    SetState(SetStateCommand),
    /// Setpoint write
    SetTemp(SetTempCommand),
    /// Keep-alive
    Ping,
}

impl Frame {
    /// Kind of this frame
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        match self {
            Self::StatusReport(_) => FrameKind::StatusReport,
            Self::SetState(_) => FrameKind::SetState,
            Self::SetTemp(_) => FrameKind::SetTemp,
            Self::Ping => FrameKind::Ping,
        }
    }
}

/// Serialize any frame, recomputing its checksum
#[must_use]
pub fn encode(frame: &Frame) -> Bytes {
    match frame {
        Frame::StatusReport(report) => report.to_bytes(),
        Frame::SetState(command) => command.to_bytes(),
        Frame::SetTemp(command) => command.to_bytes(),
        Frame::Ping => Bytes::from_static(&PING_COMMAND),
    }
}

/// Parse and validate a frame of the given kind
///
/// # Errors
///
/// Returns the [`FrameError`] of the first failed check. The ping literal is never
/// decoded and yields [`FrameError::NotDecodable`].
pub fn decode(kind: FrameKind, data: &[u8]) -> std::result::Result<Frame, FrameError> {
    match kind {
        FrameKind::StatusReport => StatusReport::from_bytes(data).map(Frame::StatusReport),
        FrameKind::SetState => SetStateCommand::from_bytes(data).map(Frame::SetState),
        FrameKind::SetTemp => SetTempCommand::from_bytes(data).map(Frame::SetTemp),
        FrameKind::Ping => Err(FrameError::NotDecodable),
    }
}

/// Check the invariants shared by all frames and return the payload
fn validate(kind: FrameKind, data: &[u8]) -> std::result::Result<&[u8], FrameError> {
    let expected = kind.frame_len();
    if data.len() != expected {
        return Err(FrameError::Length {
            expected,
            actual: data.len(),
        });
    }

    let preamble = u16::from_be_bytes([data[0], data[1]]);
    if preamble != PREAMBLE {
        return Err(FrameError::Preamble(preamble));
    }

    if data[3] != kind.command_code() {
        return Err(FrameError::CommandCode {
            expected: kind.command_code(),
            actual: data[3],
        });
    }

    if data[2] != kind.data_len() {
        return Err(FrameError::DataLength {
            expected: kind.data_len(),
            actual: data[2],
        });
    }

    let (body, tail) = data.split_at(expected - CHECKSUM_SIZE);
    let received = u16::from_be_bytes([tail[0], tail[1]]);
    let computed = kiss_checksum(body);
    if computed != received {
        return Err(FrameError::Checksum { computed, received });
    }

    Ok(&body[HEADER_SIZE..])
}

fn frame_buffer(kind: FrameKind) -> BytesMut {
    let mut buf = BytesMut::with_capacity(kind.frame_len());
    buf.put_u16(PREAMBLE);
    buf.put_u8(kind.data_len());
    buf.put_u8(kind.command_code());
    buf
}

fn finish(mut buf: BytesMut) -> Bytes {
    let checksum = kiss_checksum(&buf);
    buf.put_u16(checksum);
    buf.freeze()
}

fn put_settings(buf: &mut BytesMut, settings: &Settings) {
    buf.put_u8(u8::from(settings.locked));
    buf.put_u8(u8::from(settings.on));
    buf.put_u8(u8::from(settings.eco_mode));
    buf.put_u8(settings.voltage_cutoff);
    buf.put_i8(settings.temp_set);
    for limit in settings.setpoint_limits {
        buf.put_i8(limit);
    }
    buf.put_i8(settings.hysteresis);
    buf.put_i8(settings.soft_start_delay);
    buf.put_u8(u8::from(settings.fahrenheit));
    for compensation in settings.temp_compensation {
        buf.put_i8(compensation);
    }
    buf.put_i8(settings.shutdown_compensation);
}

fn get_settings(buf: &mut &[u8]) -> Settings {
    Settings {
        locked: buf.get_u8() != 0,
        on: buf.get_u8() != 0,
        eco_mode: buf.get_u8() != 0,
        voltage_cutoff: buf.get_u8(),
        temp_set: buf.get_i8(),
        setpoint_limits: [buf.get_i8(), buf.get_i8()],
        hysteresis: buf.get_i8(),
        soft_start_delay: buf.get_i8(),
        fahrenheit: buf.get_u8() != 0,
        temp_compensation: [buf.get_i8(), buf.get_i8(), buf.get_i8()],
        shutdown_compensation: buf.get_i8(),
    }
}

impl StatusReport {
    /// Serialize the report as the fridge would send it
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = frame_buffer(FrameKind::StatusReport);
        put_settings(&mut buf, &self.settings);
        buf.put_i8(self.sensors.temp);
        buf.put_u8(self.sensors.battery);
        buf.put_u8(self.sensors.input_volts);
        buf.put_u8(self.sensors.input_tenths);
        finish(buf)
    }

    /// Parse a status notification
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if any frame invariant fails.
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, FrameError> {
        let mut payload = validate(FrameKind::StatusReport, data)?;
        let settings = get_settings(&mut payload);
        let sensors = Sensors {
            temp: payload.get_i8(),
            battery: payload.get_u8(),
            input_volts: payload.get_u8(),
            input_tenths: payload.get_u8(),
        };
        Ok(Self { settings, sensors })
    }

    /// Checksum the report carries on the wire
    #[must_use]
    pub fn checksum(&self) -> u16 {
        let bytes = self.to_bytes();
        u16::from_be_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]])
    }
}

/// Command replacing the full settings block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetStateCommand {
    settings: Settings,
}

impl SetStateCommand {
    /// Build a settings command, rejecting setpoints outside the limits carried in
    /// the same settings value
    ///
    /// # Errors
    ///
    /// Returns [`FridgeError::OutOfBounds`] if `temp_set` falls outside the limits.
    pub fn new(settings: Settings, layout: BoundLayout) -> Result<Self> {
        let bounds = settings.bounds(layout);
        if !bounds.contains(settings.temp_set) {
            return Err(FridgeError::OutOfBounds {
                requested: settings.temp_set,
                lowest: bounds.lowest,
                highest: bounds.highest,
            });
        }
        Ok(Self { settings })
    }

    /// Settings carried by the command
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Serialize the command
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = frame_buffer(FrameKind::SetState);
        put_settings(&mut buf, &self.settings);
        finish(buf)
    }

    /// Parse a settings command
    ///
    /// Only the frame invariants are checked; the setpoint limits are the device's
    /// business once the command is on the wire.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if any frame invariant fails.
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, FrameError> {
        let mut payload = validate(FrameKind::SetState, data)?;
        Ok(Self {
            settings: get_settings(&mut payload),
        })
    }
}

/// Command changing only the setpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetTempCommand {
    /// Setpoint in device units
    pub temp: i8,
}

impl SetTempCommand {
    /// Build a setpoint command
    #[must_use]
    pub const fn new(temp: i8) -> Self {
        Self { temp }
    }

    /// Serialize the command
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = frame_buffer(FrameKind::SetTemp);
        buf.put_i8(self.temp);
        finish(buf)
    }

    /// Parse a setpoint command
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if any frame invariant fails.
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, FrameError> {
        let mut payload = validate(FrameKind::SetTemp, data)?;
        Ok(Self {
            temp: payload.get_i8(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_FIXTURE: [u8; 24] = [
        0xfe, 0xfe, 0x15, 0x01, 0x01, 0x01, 0x01, 0x00, 0x42, 0x44, 0xfc, 0x04, 0x00, 0x01, 0x00,
        0x00, 0xfb, 0x00, 0x41, 0x64, 0x0e, 0x03, 0x05, 0x4d,
    ];

    fn fixture_settings() -> Settings {
        Settings {
            locked: true,
            on: true,
            eco_mode: true,
            voltage_cutoff: 1,
            temp_set: 0x43,
            setpoint_limits: [0x44, -4],
            hysteresis: 4,
            soft_start_delay: 0,
            fahrenheit: true,
            temp_compensation: [0, 0, -5],
            shutdown_compensation: 0,
        }
    }

    #[test]
    fn test_status_report_fixture() {
        let report = StatusReport::from_bytes(&STATUS_FIXTURE).unwrap();

        assert!(report.settings.locked);
        assert!(report.settings.on);
        assert!(report.settings.eco_mode);
        assert_eq!(report.settings.voltage_cutoff, 0);
        assert_eq!(report.settings.temp_set, 0x42);
        assert_eq!(report.settings.setpoint_limits, [0x44, -4]);
        assert_eq!(report.settings.hysteresis, 4);
        assert!(report.settings.fahrenheit);
        assert_eq!(report.settings.temp_compensation, [0, 0, -5]);
        assert_eq!(report.sensors.temp, 0x41);
        assert_eq!(report.sensors.battery, 0x64);
        assert_eq!(report.sensors.input_volts, 14);
        assert_eq!(report.sensors.input_tenths, 3);
        assert_eq!(report.checksum(), 0x054d);
        assert_eq!(&report.to_bytes()[..], &STATUS_FIXTURE[..]);
    }

    #[test]
    fn test_status_report_bad_checksum() {
        let mut data = STATUS_FIXTURE;
        data[23] = 0x4e;

        assert_eq!(
            StatusReport::from_bytes(&data),
            Err(FrameError::Checksum {
                computed: 0x054d,
                received: 0x054e,
            })
        );
    }

    #[test]
    fn test_validation_order() {
        let short = &STATUS_FIXTURE[..23];
        assert_eq!(
            StatusReport::from_bytes(short),
            Err(FrameError::Length {
                expected: 24,
                actual: 23
            })
        );

        // preamble is checked before anything else in the header
        let mut data = STATUS_FIXTURE;
        data[0] = 0xfd;
        data[3] = 0x02;
        assert_eq!(
            StatusReport::from_bytes(&data),
            Err(FrameError::Preamble(0xfdfe))
        );

        // command code before data length
        let mut data = STATUS_FIXTURE;
        data[2] = 0x11;
        data[3] = 0x02;
        assert!(matches!(
            StatusReport::from_bytes(&data),
            Err(FrameError::CommandCode {
                expected: 0x01,
                actual: 0x02
            })
        ));

        let mut data = STATUS_FIXTURE;
        data[2] = 0x14;
        assert!(matches!(
            StatusReport::from_bytes(&data),
            Err(FrameError::DataLength { .. })
        ));
    }

    #[test]
    fn test_set_state_fixture() {
        let command = SetStateCommand::new(fixture_settings(), BoundLayout::HighestFirst).unwrap();
        let bytes = command.to_bytes();

        let expected: [u8; 20] = [
            0xfe, 0xfe, 0x11, 0x02, 0x01, 0x01, 0x01, 0x01, 0x43, 0x44, 0xfc, 0x04, 0x00, 0x01,
            0x00, 0x00, 0xfb, 0x00, 0x04, 0x96,
        ];
        assert_eq!(&bytes[..], &expected[..]);
        assert_eq!(bytes.len(), FrameKind::SetState.frame_len());

        let parsed = SetStateCommand::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, command);
    }

    #[test]
    fn test_set_state_rejects_out_of_bounds() {
        let mut settings = fixture_settings();
        settings.temp_set = 0x45;

        let result = SetStateCommand::new(settings, BoundLayout::HighestFirst);
        assert!(matches!(
            result,
            Err(FridgeError::OutOfBounds {
                requested: 0x45,
                lowest: -4,
                highest: 0x44
            })
        ));

        settings.temp_set = -5;
        assert!(SetStateCommand::new(settings, BoundLayout::HighestFirst).is_err());

        // the same bytes read with the other layout leave no valid setpoint
        settings.temp_set = 0x43;
        assert!(SetStateCommand::new(settings, BoundLayout::LowestFirst).is_err());
    }

    #[test]
    fn test_set_temp_fixtures() {
        let bytes = SetTempCommand::new(0x25).to_bytes();
        assert_eq!(&bytes[..], &[0xfe, 0xfe, 0x04, 0x05, 0x25, 0x02, 0x2a]);

        let literal = [0xfe, 0xfe, 0x04, 0x05, 0x26, 0x02, 0x2b];
        let parsed = SetTempCommand::from_bytes(&literal).unwrap();
        assert_eq!(parsed.temp, 0x26);
        assert_eq!(&parsed.to_bytes()[..], &literal[..]);
    }

    #[test]
    fn test_negative_fields_are_masked_not_sign_extended() {
        // -4 must contribute 0xfc, not 0xfffc
        let bytes = SetTempCommand::new(-4).to_bytes();
        assert_eq!(kiss_checksum(&bytes[..5]), 0x1fc + 0x09 + 0xfc);
        assert_eq!(&bytes[5..], &[0x03, 0x01]);
        assert_eq!(SetTempCommand::from_bytes(&bytes).unwrap().temp, -4);
    }

    #[test]
    fn test_ping_literal() {
        assert_eq!(PING_COMMAND.len(), FrameKind::Ping.frame_len());
        assert_eq!(kiss_checksum(&PING_COMMAND[..4]), 0x0200);
        assert_eq!(&encode(&Frame::Ping)[..], &PING_COMMAND[..]);
        assert_eq!(
            decode(FrameKind::Ping, &PING_COMMAND),
            Err(FrameError::NotDecodable)
        );
    }

    #[test]
    fn test_frame_kind_from_header() {
        assert_eq!(
            FrameKind::from_header(&STATUS_FIXTURE),
            Some(FrameKind::StatusReport)
        );
        assert_eq!(FrameKind::from_header(&PING_COMMAND), Some(FrameKind::Ping));
        assert_eq!(
            FrameKind::from_header(&[0xfe, 0xfe, 0x04, 0x05]),
            Some(FrameKind::SetTemp)
        );
        assert_eq!(FrameKind::from_header(&[0xfe, 0xfe, 0x09]), None);
    }

    #[test]
    fn test_generic_decode() {
        let report = StatusReport::from_bytes(&STATUS_FIXTURE).unwrap();
        let frame = Frame::StatusReport(report);

        let bytes = encode(&frame);
        let decoded = decode(frame.kind(), &bytes).unwrap();
        assert_eq!(decoded, frame);

        assert!(decode(FrameKind::SetTemp, &bytes).is_err());
    }
}
