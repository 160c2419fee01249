use std::io::Write;

use padmux::controller::hub::ControllerHub;
use padmux::controller::keyboard::{KeyBindings, KeyboardBackend, KeyboardHandle};
use padmux::controller::recorded::{RecordedInput, M64_HEADER_LEN};
use padmux::pad::{ButtonMask, PadState};

fn movie(frames: &[[u8; 4]]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0; M64_HEADER_LEN]).unwrap();
    for frame in frames {
        file.write_all(frame).unwrap();
    }
    file.flush().unwrap();
    file
}

#[test]
fn replay_and_keyboard_merge_each_tick() {
    let file = movie(&[[0x80, 0x00, 20, 20], [0x00, 0x00, 0, 0]]);
    let bindings = KeyBindings::default();
    let keyboard = KeyboardHandle::new(bindings.clone());

    let mut hub = ControllerHub::create()
        .with_backend(Box::new(RecordedInput::create(file.path())))
        .with_backend(Box::new(KeyboardBackend::create(keyboard.clone())))
        .initialize();

    assert!(keyboard.on_key_down(bindings.start));
    let pad = hub.poll();
    assert_eq!(pad.buttons, ButtonMask::A | ButtonMask::START);
    assert_eq!(pad.stick(), (20, 20));

    // Keyboard comes later in the order, so its stick overrides the replay
    assert!(keyboard.on_key_down(bindings.stick_left));
    let pad = hub.poll();
    assert_eq!(pad.buttons, ButtonMask::START);
    assert_eq!(pad.stick(), (-80, 0));

    keyboard.on_all_keys_up();
    assert_eq!(hub.poll(), PadState::default());

    hub.shutdown();
}

#[test]
fn unbound_keys_do_not_reach_the_pad() {
    let keyboard = KeyboardHandle::new(KeyBindings::default());
    let mut hub = ControllerHub::create()
        .with_backend(Box::new(KeyboardBackend::create(keyboard.clone())))
        .initialize();

    assert!(!keyboard.on_key_down(0xffff));
    assert_eq!(hub.poll(), PadState::default());
}
