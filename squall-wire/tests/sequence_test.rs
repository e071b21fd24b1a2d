use squall_wire::sequence::{
    RELIABLE_WINDOW_SIZE, SEQUENCE_SPACE, advance_sequence, in_send_window, relative_sequence,
};

#[test]
fn test_relative_sequence_basic() {
    assert_eq!(relative_sequence(5, 5), 0);
    assert_eq!(relative_sequence(6, 5), 1);
    assert_eq!(relative_sequence(4, 5), -1);
    assert_eq!(relative_sequence(100, 5), 95);
}

#[test]
fn test_relative_sequence_wraps() {
    // Adjacent across the 1023 -> 0 boundary.
    assert_eq!(relative_sequence(0, 1023), 1);
    assert_eq!(relative_sequence(1023, 0), -1);
    assert_eq!(relative_sequence(5, 1020), 9);
    assert_eq!(relative_sequence(1020, 5), -9);
}

#[test]
fn test_relative_sequence_half_space() {
    // Exactly half the space is ahead, one past is behind.
    assert_eq!(relative_sequence(512, 0), 512);
    assert_eq!(relative_sequence(513, 0), -511);
}

#[test]
fn test_advance_wraps() {
    assert_eq!(advance_sequence(1023, 1), 0);
    assert_eq!(advance_sequence(1000, 100), 76);
    assert_eq!(advance_sequence(0, SEQUENCE_SPACE), 0);
}

#[test]
fn test_send_window() {
    assert!(in_send_window(0, 0, RELIABLE_WINDOW_SIZE));
    assert!(in_send_window(63, 0, RELIABLE_WINDOW_SIZE));
    assert!(!in_send_window(64, 0, RELIABLE_WINDOW_SIZE));
    // Window straddling the wrap.
    assert!(in_send_window(3, 1000, RELIABLE_WINDOW_SIZE));
    assert!(!in_send_window(999, 1000, RELIABLE_WINDOW_SIZE));
}
