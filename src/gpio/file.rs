use std::fs;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// An open `value` attribute of an exported GPIO.
pub(super) struct ValueFile {
	file: fs::File,
}

impl ValueFile {
	pub(super) fn open(path: &Path) -> io::Result<Self> {
		let file = fs::OpenOptions::new()
			.read(true)
			.write(true)
			.open(path)?;
		Ok(ValueFile { file })
	}

	// sysfs attributes are read and written in one go from offset 0
	pub(super) fn read(&self) -> bool {
		let mut buf = [0u8; 1];
		let l = self.file.read_at(&mut buf, 0).expect("reading GPIO value must not fail");
		assert_eq!(l, 1, "GPIO value attribute is empty");
		buf[0] == b'1'
	}

	pub(super) fn write(&self, high: bool) {
		let buf: &[u8] = if high { b"1" } else { b"0" };
		let l = self.file.write_at(buf, 0).expect("writing GPIO value must not fail");
		assert_eq!(l, 1, "failed to write GPIO value");
	}
}

pub(super) fn write_attribute(path: &Path, value: &str) -> io::Result<()> {
	use std::io::Write;

	// one write() per value, sysfs doesn't accept partial writes
	fs::OpenOptions::new().write(true).open(path)?.write_all(value.as_bytes())
}
