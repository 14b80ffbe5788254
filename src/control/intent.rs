// Shared drive intent: one writer (the input session), many readers (dispatch loops)
//
// Backed by a watch channel so a reader always sees the three scalars
// as one consistent snapshot and never blocks on the writer.

use tokio::sync::watch;

/// Normalized control intent, each field in [-1, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Intent {
    pub forward: f32,
    pub turn: f32,
    pub aux: f32,
}

impl Intent {
    pub fn is_neutral(&self) -> bool {
        *self == Intent::default()
    }
}

/// Which intent field an axis drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentField {
    Forward,
    Turn,
    Aux,
}

/// Create the shared intent with a neutral initial value
pub fn channel() -> (IntentWriter, IntentReader) {
    let (tx, rx) = watch::channel(Intent::default());
    (IntentWriter { tx }, IntentReader { rx })
}

/// Write half. Not `Clone`: there is exactly one writer.
#[derive(Debug)]
pub struct IntentWriter {
    tx: watch::Sender<Intent>,
}

impl IntentWriter {
    pub fn set(&self, field: IntentField, value: f32) {
        let value = value.clamp(-1.0, 1.0);
        self.tx.send_modify(|intent| match field {
            IntentField::Forward => intent.forward = value,
            IntentField::Turn => intent.turn = value,
            IntentField::Aux => intent.aux = value,
        });
    }

    /// Zero every field
    pub fn reset(&self) {
        self.tx.send_replace(Intent::default());
    }
}

/// Read half, cloned into each dispatch loop
#[derive(Debug, Clone)]
pub struct IntentReader {
    rx: watch::Receiver<Intent>,
}

impl IntentReader {
    /// Latest value, last write wins
    pub fn snapshot(&self) -> Intent {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let (writer, reader) = channel();
        let other = reader.clone();

        writer.set(IntentField::Forward, 0.2);
        writer.set(IntentField::Forward, 0.7);
        writer.set(IntentField::Turn, -0.3);

        let expected = Intent {
            forward: 0.7,
            turn: -0.3,
            aux: 0.0,
        };
        assert_eq!(reader.snapshot(), expected);
        assert_eq!(other.snapshot(), expected);
    }

    #[test]
    fn test_values_clamped_and_reset() {
        let (writer, reader) = channel();
        writer.set(IntentField::Aux, 4.0);
        assert_eq!(reader.snapshot().aux, 1.0);

        writer.reset();
        assert!(reader.snapshot().is_neutral());
    }
}
