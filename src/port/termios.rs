//! Line settings of unix terminal devices.
//!
//! `serialport` reconfigures a device while opening it, so the settings the
//! device already had are read here first through a separate descriptor.
//! [`LineSettings`] keeps the whole termios block, which lets a session put
//! it back verbatim when it ends.

use super::error::PortError;
use super::traits::{DataBits, FlowControl, Parity, PortConfig, StopBits};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

/// Mark/space parity flag (`<asm-generic/termbits.h>`).
#[cfg(target_os = "linux")]
const MARK_SPACE: libc::tcflag_t = 0o10000000000;
#[cfg(not(target_os = "linux"))]
const MARK_SPACE: libc::tcflag_t = 0;

const PARITY_CFLAGS: libc::tcflag_t = libc::PARENB | libc::PARODD | MARK_SPACE;
const LINE_CFLAGS: libc::tcflag_t = libc::CSIZE | libc::CSTOPB | PARITY_CFLAGS | libc::CRTSCTS;
const SOFT_FLOW_IFLAGS: libc::tcflag_t = libc::IXON | libc::IXOFF | libc::IXANY;
const LINE_IFLAGS: libc::tcflag_t = SOFT_FLOW_IFLAGS | libc::INPCK;

/// Complete terminal settings of one device.
#[derive(Clone, Copy)]
pub(crate) struct LineSettings {
    termios: raw::Termios,
}

impl LineSettings {
    /// Open `path` without reconfiguring it and read its settings.
    ///
    /// The descriptor is handed back so the caller can hold it until the
    /// device has been reopened; closing the last descriptor may hang up
    /// the line.
    pub(crate) fn peek(path: &str) -> io::Result<(Self, Option<File>)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)?;
        let settings = Self::read(&file)?;
        Ok((settings, Some(file)))
    }

    pub(crate) fn read(device: &impl AsRawFd) -> io::Result<Self> {
        raw::get(device.as_raw_fd()).map(|termios| Self { termios })
    }

    pub(crate) fn write(&self, device: &impl AsRawFd) -> io::Result<()> {
        raw::set(device.as_raw_fd(), &self.termios)
    }

    /// Take speed, framing and flow control from `other`, keeping the
    /// remaining modes (raw input, echo, timeouts) as they are.
    pub(crate) fn adopt_line(&mut self, other: &Self) {
        raw::copy_speed(&mut self.termios, &other.termios);
        self.termios.c_cflag =
            (self.termios.c_cflag & !LINE_CFLAGS) | (other.termios.c_cflag & LINE_CFLAGS);
        self.termios.c_iflag =
            (self.termios.c_iflag & !LINE_IFLAGS) | (other.termios.c_iflag & LINE_IFLAGS);
    }

    pub(crate) fn config(&self) -> Result<PortConfig, PortError> {
        let baud_rate = raw::speed(&self.termios)
            .ok_or_else(|| PortError::unsupported("line speed is not a baud rate"))?;

        let cflag = self.termios.c_cflag;
        let data_bits = match cflag & libc::CSIZE {
            libc::CS5 => DataBits::Five,
            libc::CS6 => DataBits::Six,
            libc::CS7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = if cflag & libc::CSTOPB != 0 {
            StopBits::Two
        } else {
            StopBits::One
        };
        let parity = match (
            cflag & libc::PARENB != 0,
            cflag & MARK_SPACE != 0,
            cflag & libc::PARODD != 0,
        ) {
            (false, _, _) => Parity::None,
            (true, true, true) => Parity::Mark,
            (true, true, false) => Parity::Space,
            (true, false, true) => Parity::Odd,
            (true, false, false) => Parity::Even,
        };
        let flow_control = if cflag & libc::CRTSCTS != 0 {
            FlowControl::RtsCts
        } else if self.termios.c_iflag & (libc::IXON | libc::IXOFF) != 0 {
            FlowControl::XonXoff
        } else {
            FlowControl::None
        };

        Ok(PortConfig {
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            flow_control,
        })
    }

    pub(crate) fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        raw::set_speed(&mut self.termios, baud_rate)
    }

    pub(crate) fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), PortError> {
        let size = match data_bits {
            DataBits::Five => libc::CS5,
            DataBits::Six => libc::CS6,
            DataBits::Seven => libc::CS7,
            DataBits::Eight => libc::CS8,
            DataBits::Nine => return Err(PortError::unsupported("9 data bits")),
        };
        self.termios.c_cflag = (self.termios.c_cflag & !libc::CSIZE) | size;
        Ok(())
    }

    pub(crate) fn set_stop_bits(&mut self, stop_bits: StopBits) {
        match stop_bits {
            StopBits::One => self.termios.c_cflag &= !libc::CSTOPB,
            StopBits::Two => self.termios.c_cflag |= libc::CSTOPB,
        }
    }

    pub(crate) fn set_parity(&mut self, parity: Parity) -> Result<(), PortError> {
        let bits = match parity {
            Parity::None => 0,
            Parity::Odd => libc::PARENB | libc::PARODD,
            Parity::Even => libc::PARENB,
            Parity::Mark | Parity::Space if MARK_SPACE == 0 => {
                return Err(PortError::unsupported(format!("{parity:?} parity")))
            }
            Parity::Mark => libc::PARENB | libc::PARODD | MARK_SPACE,
            Parity::Space => libc::PARENB | MARK_SPACE,
        };
        self.termios.c_cflag = (self.termios.c_cflag & !PARITY_CFLAGS) | bits;
        if parity == Parity::None {
            self.termios.c_iflag &= !libc::INPCK;
        } else {
            self.termios.c_iflag |= libc::INPCK;
        }
        Ok(())
    }

    pub(crate) fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError> {
        let (cflag, iflag) = match flow_control {
            FlowControl::None => (0, 0),
            FlowControl::RtsCts => (libc::CRTSCTS, 0),
            FlowControl::XonXoff => (0, libc::IXON | libc::IXOFF),
            FlowControl::DtrDsr => return Err(PortError::unsupported("DTR/DSR flow control")),
        };
        self.termios.c_cflag = (self.termios.c_cflag & !libc::CRTSCTS) | cflag;
        self.termios.c_iflag = (self.termios.c_iflag & !SOFT_FLOW_IFLAGS) | iflag;
        Ok(())
    }
}

impl PartialEq for LineSettings {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (&self.termios, &other.termios);
        a.c_iflag == b.c_iflag
            && a.c_oflag == b.c_oflag
            && a.c_cflag == b.c_cflag
            && a.c_lflag == b.c_lflag
            && a.c_cc == b.c_cc
            && raw::speed(a) == raw::speed(b)
    }
}

impl fmt::Debug for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineSettings")
            .field("config", &self.config().ok())
            .field("c_iflag", &format_args!("{:#o}", self.termios.c_iflag))
            .field("c_cflag", &format_args!("{:#o}", self.termios.c_cflag))
            .field("c_lflag", &format_args!("{:#o}", self.termios.c_lflag))
            .finish()
    }
}

// Linux keeps arbitrary speeds in termios2; the plain termios API only
// reports them as BOTHER.
#[cfg(all(
    target_os = "linux",
    not(any(
        target_env = "musl",
        target_arch = "powerpc",
        target_arch = "powerpc64"
    ))
))]
mod raw {
    use super::{baud_to_speed, speed_to_baud, PortError};
    use std::io;
    use std::mem::MaybeUninit;
    use std::os::unix::io::RawFd;

    pub(super) type Termios = libc::termios2;

    /// Input speed field; zero means "same as output".
    const CIBAUD: libc::tcflag_t = libc::CBAUD << 16;

    pub(super) fn get(fd: RawFd) -> io::Result<Termios> {
        let mut termios = MaybeUninit::<Termios>::uninit();
        // SAFETY: TCGETS2 fills the whole struct when it returns 0.
        unsafe {
            if libc::ioctl(fd, libc::TCGETS2 as _, termios.as_mut_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(termios.assume_init())
        }
    }

    pub(super) fn set(fd: RawFd, termios: &Termios) -> io::Result<()> {
        // SAFETY: TCSETS2 only reads the struct.
        if unsafe { libc::ioctl(fd, libc::TCSETS2 as _, termios as *const Termios) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn speed(termios: &Termios) -> Option<u32> {
        let reported = (termios.c_ospeed > 0).then_some(termios.c_ospeed);
        match termios.c_cflag & libc::CBAUD {
            libc::BOTHER => reported,
            code => speed_to_baud(code).or(reported),
        }
    }

    pub(super) fn set_speed(termios: &mut Termios, baud_rate: u32) -> Result<(), PortError> {
        let code = baud_to_speed(baud_rate).unwrap_or(libc::BOTHER);
        termios.c_cflag = (termios.c_cflag & !(libc::CBAUD | CIBAUD)) | code;
        termios.c_ispeed = baud_rate;
        termios.c_ospeed = baud_rate;
        Ok(())
    }

    pub(super) fn copy_speed(to: &mut Termios, from: &Termios) {
        let mask = libc::CBAUD | CIBAUD;
        to.c_cflag = (to.c_cflag & !mask) | (from.c_cflag & mask);
        to.c_ispeed = from.c_ispeed;
        to.c_ospeed = from.c_ospeed;
    }

    #[cfg(test)]
    mod tests {
        use super::super::LineSettings;
        use super::*;
        use crate::port::{FlowControl, Parity};

        fn blank() -> LineSettings {
            // SAFETY: termios2 is plain integers; all-zero is a valid value.
            let mut termios: Termios = unsafe { std::mem::zeroed() };
            termios.c_cflag = libc::CS8 | libc::CREAD;
            LineSettings { termios }
        }

        #[test]
        fn test_arbitrary_speed_is_read_from_termios2() {
            let mut line = blank();
            line.termios.c_cflag |= libc::BOTHER;
            line.termios.c_ospeed = 250_000;
            assert_eq!(line.config().unwrap().baud_rate, 250_000);
        }

        #[test]
        fn test_standard_speed_code_decodes() {
            let mut line = blank();
            line.termios.c_cflag |= libc::B115200;
            assert_eq!(line.config().unwrap().baud_rate, 115_200);
        }

        #[test]
        fn test_mark_and_space_parity_decode() {
            let mut line = blank();
            line.termios.c_cflag |= libc::B9600 | libc::PARENB | libc::PARODD;
            line.termios.c_cflag |= super::super::MARK_SPACE;
            assert_eq!(line.config().unwrap().parity, Parity::Mark);

            line.termios.c_cflag &= !libc::PARODD;
            assert_eq!(line.config().unwrap().parity, Parity::Space);
        }

        #[test]
        fn test_setters_round_trip_through_flags() {
            let mut line = blank();
            line.set_baud_rate(31_250).unwrap();
            line.set_parity(Parity::Space).unwrap();
            line.set_flow_control(FlowControl::RtsCts).unwrap();

            let config = line.config().unwrap();
            assert_eq!(config.baud_rate, 31_250);
            assert_eq!(config.parity, Parity::Space);
            assert_eq!(config.flow_control, FlowControl::RtsCts);
            assert_eq!(line.termios.c_cflag & libc::CBAUD, libc::BOTHER);
        }
    }
}

#[cfg(not(all(
    target_os = "linux",
    not(any(
        target_env = "musl",
        target_arch = "powerpc",
        target_arch = "powerpc64"
    ))
)))]
mod raw {
    use super::{baud_to_speed, speed_to_baud, PortError};
    use std::io;
    use std::mem::MaybeUninit;
    use std::os::unix::io::RawFd;

    pub(super) type Termios = libc::termios;

    pub(super) fn get(fd: RawFd) -> io::Result<Termios> {
        let mut termios = MaybeUninit::<Termios>::uninit();
        // SAFETY: tcgetattr fills the whole struct when it returns 0.
        unsafe {
            if libc::tcgetattr(fd, termios.as_mut_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(termios.assume_init())
        }
    }

    pub(super) fn set(fd: RawFd, termios: &Termios) -> io::Result<()> {
        // SAFETY: tcsetattr only reads the struct.
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, termios) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn speed(termios: &Termios) -> Option<u32> {
        // SAFETY: reads from an initialised struct.
        speed_to_baud(unsafe { libc::cfgetospeed(termios) })
    }

    pub(super) fn set_speed(termios: &mut Termios, baud_rate: u32) -> Result<(), PortError> {
        let speed = baud_to_speed(baud_rate)
            .ok_or_else(|| PortError::unsupported(format!("{baud_rate} baud")))?;
        // SAFETY: writes into an initialised struct.
        if unsafe { libc::cfsetspeed(termios, speed) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub(super) fn copy_speed(to: &mut Termios, from: &Termios) {
        // SAFETY: both structs are initialised; these calls only move speed fields.
        unsafe {
            libc::cfsetispeed(to, libc::cfgetispeed(from));
            libc::cfsetospeed(to, libc::cfgetospeed(from));
        }
    }
}

#[cfg(target_os = "linux")]
const SPEEDS: [(libc::speed_t, u32); 22] = [
    (libc::B50, 50),
    (libc::B75, 75),
    (libc::B110, 110),
    (libc::B134, 134),
    (libc::B150, 150),
    (libc::B200, 200),
    (libc::B300, 300),
    (libc::B600, 600),
    (libc::B1200, 1200),
    (libc::B1800, 1800),
    (libc::B2400, 2400),
    (libc::B4800, 4800),
    (libc::B9600, 9600),
    (libc::B19200, 19200),
    (libc::B38400, 38400),
    (libc::B57600, 57600),
    (libc::B115200, 115200),
    (libc::B230400, 230400),
    (libc::B460800, 460800),
    (libc::B500000, 500000),
    (libc::B576000, 576000),
    (libc::B921600, 921600),
];

/// Linux encodes standard speeds as `Bxxx` codes.
#[cfg(target_os = "linux")]
fn speed_to_baud(speed: libc::speed_t) -> Option<u32> {
    SPEEDS
        .iter()
        .find(|(code, _)| *code == speed)
        .map(|&(_, baud)| baud)
}

#[cfg(target_os = "linux")]
fn baud_to_speed(baud_rate: u32) -> Option<libc::speed_t> {
    SPEEDS
        .iter()
        .find(|(_, baud)| *baud == baud_rate)
        .map(|&(code, _)| code)
}

/// BSD-derived systems store the rate itself.
#[cfg(not(target_os = "linux"))]
fn speed_to_baud(speed: libc::speed_t) -> Option<u32> {
    u32::try_from(speed).ok().filter(|baud| *baud > 0)
}

#[cfg(not(target_os = "linux"))]
fn baud_to_speed(baud_rate: u32) -> Option<libc::speed_t> {
    Some(baud_rate.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_missing_device_fails() {
        let err = LineSettings::peek("/dev/nonexistent_port_12345").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_peek_rejects_non_terminal() {
        // A regular file opens fine but has no termios
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        assert!(LineSettings::peek(path).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_speed_table() {
        assert_eq!(speed_to_baud(libc::B115200), Some(115200));
        assert_eq!(speed_to_baud(libc::B0), None);
        assert_eq!(baud_to_speed(9600), Some(libc::B9600));
        assert_eq!(baud_to_speed(250_000), None);
    }
}
