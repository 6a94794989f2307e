use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bme680_monitor::session::{Error, Reading, Session, DEFAULT_WAIT_FACTOR};
use bme680_monitor::settings::{Channel, IirFilter, Oversampling, Settings};
use bme680_monitor::{Clock, FieldData, PowerMode, Select, SensorDriver};
use embedded_hal::delay::DelayNs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FakeError;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Apply(Select, Settings),
    Mode(PowerMode),
    Field,
    Reset,
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    field: FieldData,
    duration: u32,
    fail_apply: bool,
    fail_mode: bool,
    fail_read: bool,
    fail_reset: bool,
}

impl Script {
    fn applies(&self) -> Vec<(Select, Settings)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Apply(select, settings) => Some((*select, *settings)),
                _ => None,
            })
            .collect()
    }
}

struct FakeDriver(Rc<RefCell<Script>>);

impl SensorDriver for FakeDriver {
    type Error = FakeError;

    fn apply_settings(&mut self, select: Select, settings: &Settings) -> Result<(), FakeError> {
        let mut script = self.0.borrow_mut();
        script.calls.push(Call::Apply(select, *settings));
        if script.fail_apply {
            Err(FakeError)
        } else {
            Ok(())
        }
    }

    fn apply_mode(&mut self, mode: PowerMode) -> Result<(), FakeError> {
        let mut script = self.0.borrow_mut();
        script.calls.push(Call::Mode(mode));
        if script.fail_mode {
            Err(FakeError)
        } else {
            Ok(())
        }
    }

    fn profile_duration(&self, _settings: &Settings) -> u32 {
        self.0.borrow().duration
    }

    fn field_data(&mut self) -> Result<FieldData, FakeError> {
        let mut script = self.0.borrow_mut();
        script.calls.push(Call::Field);
        if script.fail_read {
            Err(FakeError)
        } else {
            Ok(script.field)
        }
    }

    fn soft_reset(&mut self) -> Result<(), FakeError> {
        let mut script = self.0.borrow_mut();
        script.calls.push(Call::Reset);
        if script.fail_reset {
            Err(FakeError)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone)]
struct ManualClock(Rc<Cell<u64>>);

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// Records every wait and moves the clock forward by it.
struct RecordingDelay {
    clock: Rc<Cell<u64>>,
    waits_ms: Rc<RefCell<Vec<u32>>>,
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.delay_ms(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.waits_ms.borrow_mut().push(ms);
        self.clock.set(self.clock.get() + ms as u64);
    }
}

struct Harness {
    session: Session<FakeDriver, RecordingDelay, ManualClock>,
    script: Rc<RefCell<Script>>,
    now: Rc<Cell<u64>>,
    waits_ms: Rc<RefCell<Vec<u32>>>,
}

/// New sample with valid gas and a stable heater.
const GOOD_STATUS: u8 = 0x80 | 0x20 | 0x10;

fn good_field() -> FieldData {
    FieldData {
        status: GOOD_STATUS,
        gas_index: 0,
        meas_index: 0,
        temperature: 2581,
        pressure: 101325,
        humidity: 45123,
        gas_resistance: 120_000,
    }
}

fn harness() -> Harness {
    let script = Rc::new(RefCell::new(Script {
        field: good_field(),
        duration: 183,
        ..Script::default()
    }));
    let now = Rc::new(Cell::new(1000));
    let waits_ms = Rc::new(RefCell::new(Vec::new()));

    let session = Session::new(
        FakeDriver(script.clone()),
        RecordingDelay {
            clock: now.clone(),
            waits_ms: waits_ms.clone(),
        },
        ManualClock(now.clone()),
    );

    Harness {
        session,
        script,
        now,
        waits_ms,
    }
}

fn assert_close(actual: f32, expected: f32) {
    assert!((actual - expected).abs() < 1e-3, "{} != {}", actual, expected);
}

#[test]
fn full_cycle_with_defaults() {
    let mut h = harness();

    let reading = h.session.fetch_result().unwrap();

    assert_close(reading.temperature, 25.81);
    assert_close(reading.humidity, 45.123);
    assert_close(reading.pressure, 101325.0);
    assert_eq!(reading.gas_resistance, 120_000);
    assert!(h.session.last_sample_fresh());
    assert_eq!(h.session.reading(), reading);

    let script = h.script.borrow();
    assert_eq!(
        script.calls,
        vec![
            Call::Apply(Select::from_bits(0xDF), Settings::default()),
            Call::Mode(PowerMode::Forced),
            Call::Field,
        ]
    );
}

#[test]
fn waits_twice_the_remaining_time() {
    let mut h = harness();
    assert_eq!(h.session.wait_factor(), DEFAULT_WAIT_FACTOR);

    h.session.fetch_result().unwrap();

    assert_eq!(*h.waits_ms.borrow(), vec![366]);
}

#[test]
fn wait_factor_is_configurable() {
    let mut h = harness();
    h.session.set_wait_factor(1);

    h.session.fetch_result().unwrap();

    assert_eq!(*h.waits_ms.borrow(), vec![183]);
}

#[test]
fn only_the_remaining_time_is_waited() {
    let mut h = harness();

    assert_eq!(h.session.begin_measurement().unwrap(), 1183);
    h.now.set(1150);
    h.session.fetch_result().unwrap();

    assert_eq!(*h.waits_ms.borrow(), vec![66]);
}

#[test]
fn no_wait_after_the_deadline() {
    let mut h = harness();

    h.session.begin_measurement().unwrap();
    h.now.set(1500);
    h.session.fetch_result().unwrap();

    assert!(h.waits_ms.borrow().is_empty());
}

#[test]
fn trigger_is_idempotent_while_in_progress() {
    let mut h = harness();

    let first = h.session.begin_measurement().unwrap();
    h.now.set(1100);
    let second = h.session.begin_measurement().unwrap();

    assert_eq!(first, 1183);
    assert_eq!(second, first);
    assert!(h.session.is_in_progress());
    assert_eq!(h.script.borrow().applies().len(), 1);

    // The outstanding cycle is consumed, not restarted.
    h.session.fetch_result().unwrap();
    assert!(!h.session.is_in_progress());
    assert_eq!(h.script.borrow().applies().len(), 1);
}

#[test]
fn stale_sample_is_nan_and_zero() {
    let mut h = harness();
    h.session.fetch_result().unwrap();

    h.script.borrow_mut().field.status = GOOD_STATUS & !0x80;
    let reading = h.session.fetch_result().unwrap();

    assert!(reading.temperature.is_nan());
    assert!(reading.humidity.is_nan());
    assert!(reading.pressure.is_nan());
    assert_eq!(reading.gas_resistance, 0);
    assert!(!h.session.last_sample_fresh());
    assert!(!h.session.is_in_progress());
}

#[test]
fn unstable_heater_zeroes_gas() {
    let mut h = harness();
    h.script.borrow_mut().field.status = 0x80 | 0x20;

    let reading = h.session.fetch_result().unwrap();

    assert_eq!(reading.gas_resistance, 0);
    assert_close(reading.temperature, 25.81);
}

#[test]
fn gas_valid_flag_alone_is_not_enough() {
    let mut h = harness();
    h.script.borrow_mut().field.status = 0x80 | 0x10;

    assert_eq!(h.session.fetch_result().unwrap().gas_resistance, 120_000);
}

#[test]
fn heater_off_disables_gas() {
    let mut h = harness();
    h.session.set_heater(0, 150);
    assert!(!h.session.enabled().gas);

    let reading = h.session.fetch_result().unwrap();

    assert_eq!(reading.gas_resistance, 0);
    let (select, settings) = h.script.borrow().applies()[0];
    assert!(select.contains(Select::RUN_GAS));
    assert!(!select.intersects(Select::GAS_MEAS | Select::NB_CONV));
    assert_eq!(settings.heater.target_temp, 0);

    h.session.set_heater(320, 0);
    assert!(!h.session.enabled().gas);
    h.session.set_heater(320, 150);
    assert!(h.session.enabled().gas);
}

#[test]
fn skipped_channel_reads_nan() {
    let mut h = harness();
    h.session.set_oversampling(Channel::Humidity, 0).unwrap();

    let reading = h.session.fetch_result().unwrap();

    assert!(reading.humidity.is_nan());
    assert_close(reading.temperature, 25.81);
    let (select, settings) = h.script.borrow().applies()[0];
    assert!(!select.contains(Select::OSH));
    assert_eq!(settings.os_hum, Oversampling::Skipped);
}

#[test]
fn every_oversampling_factor_sets_the_enable_flag() {
    let mut h = harness();
    let channels = [
        (Channel::Temperature, Select::OST),
        (Channel::Humidity, Select::OSH),
        (Channel::Pressure, Select::OSP),
    ];

    for (channel, bit) in channels {
        // 0 first, so every later factor turns a skipped channel back on.
        for factor in [0, 1, 2, 4, 8, 16] {
            h.session.set_oversampling(channel, factor).unwrap();

            let enabled = *h.session.enabled();
            let (flag, stored) = match channel {
                Channel::Temperature => (enabled.temperature, h.session.settings().os_temp),
                Channel::Humidity => (enabled.humidity, h.session.settings().os_hum),
                Channel::Pressure => (enabled.pressure, h.session.settings().os_pres),
            };
            assert_eq!(flag, factor != 0, "{:?} x{}", channel, factor);
            assert_eq!(Some(stored), Oversampling::from_factor(factor));
            assert_eq!(stored.is_enabled(), factor != 0);

            h.session.fetch_result().unwrap();
            let (select, _) = *h.script.borrow().applies().last().unwrap();
            assert_eq!(select.contains(bit), factor != 0, "{:?} x{}", channel, factor);
        }
    }
}

#[test]
fn invalid_oversampling_leaves_state_unchanged() {
    let mut h = harness();
    let before = *h.session.settings();
    let enabled = *h.session.enabled();

    for factor in [3, 5, 32] {
        assert_eq!(
            h.session.set_oversampling(Channel::Temperature, factor),
            Err(Error::InvalidParameter)
        );
    }

    assert_eq!(*h.session.settings(), before);
    assert_eq!(*h.session.enabled(), enabled);
}

#[test]
fn oversampling_is_stored() {
    let mut h = harness();

    h.session.set_oversampling(Channel::Pressure, 16).unwrap();
    h.session.set_oversampling(Channel::Temperature, 1).unwrap();

    assert_eq!(h.session.settings().os_pres, Oversampling::X16);
    assert_eq!(h.session.settings().os_temp, Oversampling::X1);
}

#[test]
fn filter_validation() {
    let mut h = harness();

    assert_eq!(h.session.set_filter(5), Err(Error::InvalidParameter));
    assert_eq!(h.session.settings().filter, IirFilter::Size3);

    h.session.set_filter(0).unwrap();
    assert!(!h.session.enabled().filter);
    h.session.set_filter(127).unwrap();
    assert_eq!(h.session.settings().filter, IirFilter::Size127);
    assert!(h.session.enabled().filter);
}

#[test]
fn apply_failure_leaves_no_cycle() {
    let mut h = harness();
    h.script.borrow_mut().fail_apply = true;

    assert_eq!(h.session.begin_measurement(), Err(Error::DeviceConfig(FakeError)));
    assert!(!h.session.is_in_progress());
    assert!(!h.script.borrow().calls.contains(&Call::Mode(PowerMode::Forced)));

    h.script.borrow_mut().fail_apply = false;
    assert_eq!(h.session.begin_measurement(), Ok(1183));
}

#[test]
fn mode_failure_leaves_no_cycle() {
    let mut h = harness();
    h.script.borrow_mut().fail_mode = true;

    assert_eq!(h.session.fetch_result(), Err(Error::DeviceMode(FakeError)));
    assert!(!h.session.is_in_progress());
    assert!(!h.script.borrow().calls.contains(&Call::Field));
}

#[test]
fn read_failure_keeps_previous_reading() {
    let mut h = harness();
    let good = h.session.fetch_result().unwrap();

    h.script.borrow_mut().fail_read = true;
    assert_eq!(h.session.fetch_result(), Err(Error::DeviceRead(FakeError)));

    assert_eq!(h.session.reading(), good);
    assert!(!h.session.is_in_progress());
}

#[test]
fn reset_drops_outstanding_cycle() {
    let mut h = harness();
    h.session.set_oversampling(Channel::Humidity, 4).unwrap();
    h.session.begin_measurement().unwrap();

    h.session.reset().unwrap();

    assert!(!h.session.is_in_progress());
    assert_eq!(h.session.settings().os_hum, Oversampling::X4);
    assert_eq!(h.script.borrow().calls.last(), Some(&Call::Reset));
}

#[test]
fn reset_failure() {
    let mut h = harness();
    h.script.borrow_mut().fail_reset = true;

    assert_eq!(h.session.reset(), Err(Error::DeviceReset(FakeError)));
}

#[test]
fn temperature_updates_heater_ambient() {
    let mut h = harness();
    assert_eq!(h.session.settings().ambient_temp, 25);

    h.script.borrow_mut().field.temperature = 3190;
    h.session.fetch_result().unwrap();
    assert_eq!(h.session.settings().ambient_temp, 31);

    h.session.fetch_result().unwrap();
    let applies = h.script.borrow().applies();
    assert_eq!(applies[1].1.ambient_temp, 31);
}

#[test]
fn single_value_accessors() {
    let mut h = harness();

    assert_close(h.session.read_temperature().unwrap(), 25.81);
    assert_close(h.session.read_humidity().unwrap(), 45.123);
    assert_close(h.session.read_pressure().unwrap(), 101325.0);
    assert_eq!(h.session.read_gas().unwrap(), 120_000);
    assert_eq!(h.session.read_altitude(101325.0).unwrap(), 0.0);
    assert_eq!(h.script.borrow().applies().len(), 5);
}

#[test]
fn initial_reading_is_empty() {
    let h = harness();
    let reading = h.session.reading();

    assert!(reading.temperature.is_nan());
    assert!(reading.humidity.is_nan());
    assert!(reading.pressure.is_nan());
    assert_eq!(reading.gas_resistance, 0);
    assert!(Reading::default().dew_point().is_nan());
}
