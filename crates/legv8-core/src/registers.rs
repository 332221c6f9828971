use crate::decoder::Register;
use crate::Fault;

/// Number of architecturally visible general-purpose registers (`X0..X31`).
pub const GENERAL_REGISTER_COUNT: usize = Register::COUNT;

/// General register file; `XZR` reads zero and ignores writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegisterFile {
    values: [i64; GENERAL_REGISTER_COUNT],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            values: [0; GENERAL_REGISTER_COUNT],
        }
    }
}

impl RegisterFile {
    /// Reads a register.
    #[must_use]
    pub const fn read(&self, register: Register) -> i64 {
        self.values[register.index()]
    }

    /// Writes a register. Writes to `XZR` are discarded.
    pub const fn write(&mut self, register: Register, value: i64) {
        if !register.is_zero_register() {
            self.values[register.index()] = value;
        }
    }

    /// Reads a register by raw index.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::InvalidRegisterIndex`] for indices above 31.
    pub fn get(&self, index: usize) -> Result<i64, Fault> {
        self.values
            .get(index)
            .copied()
            .ok_or(Fault::InvalidRegisterIndex(index))
    }

    /// Writes a register by raw index.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::InvalidRegisterIndex`] for indices above 31.
    pub fn set(&mut self, index: usize, value: i64) -> Result<(), Fault> {
        let register = u8::try_from(index)
            .ok()
            .and_then(Register::new)
            .ok_or(Fault::InvalidRegisterIndex(index))?;
        self.write(register, value);
        Ok(())
    }

    /// Copy of all 32 slots, `X31` included.
    #[must_use]
    pub const fn snapshot(&self) -> [i64; GENERAL_REGISTER_COUNT] {
        self.values
    }

    /// Replaces every slot from a snapshot; slot 31 is forced back to zero.
    pub const fn restore(&mut self, values: &[i64; GENERAL_REGISTER_COUNT]) {
        self.values = *values;
        self.values[Register::XZR.index()] = 0;
    }

    /// Zeroes every register.
    pub const fn clear(&mut self) {
        self.values = [0; GENERAL_REGISTER_COUNT];
    }
}
