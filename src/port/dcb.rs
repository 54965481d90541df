//! Line settings of Windows COM ports, kept as the driver's `DCB`.

use super::error::PortError;
use super::traits::{DataBits, FlowControl, Parity, PortConfig, StopBits};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::windows::io::AsRawHandle;
use winapi::shared::minwindef::DWORD;
use winapi::um::commapi::{GetCommState, SetCommState};
use winapi::um::winbase::{
    DCB, DTR_CONTROL_ENABLE, DTR_CONTROL_HANDSHAKE, EVENPARITY, MARKPARITY, NOPARITY, ODDPARITY,
    ONE5STOPBITS, ONESTOPBIT, RTS_CONTROL_ENABLE, RTS_CONTROL_HANDSHAKE, SPACEPARITY, TWOSTOPBITS,
};
use winapi::um::winnt::HANDLE;

/// Complete `DCB` of one device.
#[derive(Clone, Copy)]
pub(crate) struct LineSettings {
    dcb: DCB,
}

impl LineSettings {
    /// Read the settings of `name` without changing them.
    ///
    /// COM ports admit a single open handle, so nothing is held open for the
    /// caller.
    pub(crate) fn peek(name: &str) -> io::Result<(Self, Option<File>)> {
        let path = if name.starts_with(r"\\.\") {
            name.to_string()
        } else {
            format!(r"\\.\{name}")
        };
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let settings = Self::read(&file)?;
        Ok((settings, None))
    }

    pub(crate) fn read(device: &impl AsRawHandle) -> io::Result<Self> {
        // SAFETY: DCB is plain data; GetCommState fills it when it succeeds.
        let mut dcb: DCB = unsafe { mem::zeroed() };
        dcb.DCBlength = mem::size_of::<DCB>() as DWORD;
        if unsafe { GetCommState(device.as_raw_handle() as HANDLE, &mut dcb) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { dcb })
    }

    pub(crate) fn write(&self, device: &impl AsRawHandle) -> io::Result<()> {
        let mut dcb = self.dcb;
        // SAFETY: SetCommState only reads the struct.
        if unsafe { SetCommState(device.as_raw_handle() as HANDLE, &mut dcb) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// The DCB holds nothing but line settings, so all of it is taken.
    pub(crate) fn adopt_line(&mut self, other: &Self) {
        self.dcb = other.dcb;
    }

    pub(crate) fn config(&self) -> Result<PortConfig, PortError> {
        let dcb = &self.dcb;
        if dcb.BaudRate == 0 {
            return Err(PortError::unsupported("line speed is not a baud rate"));
        }
        let data_bits = match dcb.ByteSize {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            9 => DataBits::Nine,
            _ => DataBits::Eight,
        };
        let stop_bits = match dcb.StopBits {
            ONESTOPBIT => StopBits::One,
            TWOSTOPBITS => StopBits::Two,
            ONE5STOPBITS => return Err(PortError::unsupported("1.5 stop bits")),
            other => return Err(PortError::unsupported(format!("stop bits code {other}"))),
        };
        let parity = match dcb.Parity {
            NOPARITY => Parity::None,
            ODDPARITY => Parity::Odd,
            EVENPARITY => Parity::Even,
            MARKPARITY => Parity::Mark,
            SPACEPARITY => Parity::Space,
            other => return Err(PortError::unsupported(format!("parity code {other}"))),
        };
        let flow_control = if dcb.fOutxCtsFlow() != 0 || dcb.fRtsControl() == RTS_CONTROL_HANDSHAKE
        {
            FlowControl::RtsCts
        } else if dcb.fOutxDsrFlow() != 0 || dcb.fDtrControl() == DTR_CONTROL_HANDSHAKE {
            FlowControl::DtrDsr
        } else if dcb.fOutX() != 0 || dcb.fInX() != 0 {
            FlowControl::XonXoff
        } else {
            FlowControl::None
        };

        Ok(PortConfig {
            baud_rate: dcb.BaudRate,
            data_bits,
            stop_bits,
            parity,
            flow_control,
        })
    }

    pub(crate) fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        self.dcb.BaudRate = baud_rate;
        Ok(())
    }

    pub(crate) fn set_data_bits(&mut self, data_bits: DataBits) -> Result<(), PortError> {
        self.dcb.ByteSize = u8::from(data_bits);
        Ok(())
    }

    pub(crate) fn set_stop_bits(&mut self, stop_bits: StopBits) {
        self.dcb.StopBits = match stop_bits {
            StopBits::One => ONESTOPBIT,
            StopBits::Two => TWOSTOPBITS,
        };
    }

    pub(crate) fn set_parity(&mut self, parity: Parity) -> Result<(), PortError> {
        self.dcb.Parity = match parity {
            Parity::None => NOPARITY,
            Parity::Odd => ODDPARITY,
            Parity::Even => EVENPARITY,
            Parity::Mark => MARKPARITY,
            Parity::Space => SPACEPARITY,
        };
        self.dcb.set_fParity(DWORD::from(parity != Parity::None));
        Ok(())
    }

    pub(crate) fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<(), PortError> {
        let dcb = &mut self.dcb;
        let rts_cts = flow_control == FlowControl::RtsCts;
        let dtr_dsr = flow_control == FlowControl::DtrDsr;
        let xon_xoff = DWORD::from(flow_control == FlowControl::XonXoff);

        dcb.set_fOutxCtsFlow(DWORD::from(rts_cts));
        dcb.set_fRtsControl(if rts_cts {
            RTS_CONTROL_HANDSHAKE
        } else {
            RTS_CONTROL_ENABLE
        });
        dcb.set_fOutxDsrFlow(DWORD::from(dtr_dsr));
        dcb.set_fDtrControl(if dtr_dsr {
            DTR_CONTROL_HANDSHAKE
        } else {
            DTR_CONTROL_ENABLE
        });
        dcb.set_fOutX(xon_xoff);
        dcb.set_fInX(xon_xoff);
        Ok(())
    }
}

impl PartialEq for LineSettings {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (&self.dcb, &other.dcb);
        a.BaudRate == b.BaudRate
            && a.BitFields == b.BitFields
            && a.XonLim == b.XonLim
            && a.XoffLim == b.XoffLim
            && a.ByteSize == b.ByteSize
            && a.Parity == b.Parity
            && a.StopBits == b.StopBits
            && a.XonChar == b.XonChar
            && a.XoffChar == b.XoffChar
            && a.ErrorChar == b.ErrorChar
            && a.EofChar == b.EofChar
            && a.EvtChar == b.EvtChar
    }
}

impl fmt::Debug for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineSettings")
            .field("config", &self.config().ok())
            .field("flags", &format_args!("{:#x}", self.dcb.BitFields))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> LineSettings {
        // SAFETY: DCB is plain data.
        let mut dcb: DCB = unsafe { mem::zeroed() };
        dcb.BaudRate = 9600;
        dcb.ByteSize = 8;
        LineSettings { dcb }
    }

    #[test]
    fn test_mark_parity_and_dsr_flow_decode() {
        let mut line = blank();
        line.set_parity(Parity::Mark).unwrap();
        line.set_flow_control(FlowControl::DtrDsr).unwrap();

        let config = line.config().unwrap();
        assert_eq!(config.parity, Parity::Mark);
        assert_eq!(config.flow_control, FlowControl::DtrDsr);
    }

    #[test]
    fn test_one_and_a_half_stop_bits_are_unsupported() {
        let mut line = blank();
        line.dcb.StopBits = ONE5STOPBITS;
        assert!(matches!(line.config(), Err(PortError::Unsupported(_))));
    }
}
