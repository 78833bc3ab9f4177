//! GPIO line setup, interrupt routing and GPIO-wake light sleep.
//!
//! Configures the button, touch and sensor-supply lines using raw
//! ESP-IDF sys calls. Interrupt handlers are static functions that only
//! touch the signal bridge in [`crate::events`].

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::info;

#[cfg(target_os = "espidf")]
use crate::pins;

// ── Error type ────────────────────────────────────────────────

/// Errors during one-shot GPIO initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioError {
    ConfigFailed(i32),
    IsrInstallFailed(i32),
    HandlerAddFailed(i32),
}

impl core::fmt::Display for GpioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::IsrInstallFailed(rc) => write!(f, "GPIO ISR service install failed (rc={})", rc),
            Self::HandlerAddFailed(rc) => write!(f, "GPIO ISR handler add failed (rc={})", rc),
        }
    }
}

impl std::error::Error for GpioError {}

// ── Line configuration ────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub fn init_lines() -> Result<(), GpioError> {
    let inputs = [
        (pins::BUTTON_GPIO, true, gpio_int_type_t_GPIO_INTR_ANYEDGE),
        (pins::SENSOR_TOUCH_GPIO, false, gpio_int_type_t_GPIO_INTR_POSEDGE),
    ];
    for (pin, pull_up, intr) in inputs {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: if pull_up {
                gpio_pullup_t_GPIO_PULLUP_ENABLE
            } else {
                gpio_pullup_t_GPIO_PULLUP_DISABLE
            },
            pull_down_en: if pull_up {
                gpio_pulldown_t_GPIO_PULLDOWN_DISABLE
            } else {
                gpio_pulldown_t_GPIO_PULLDOWN_ENABLE
            },
            intr_type: intr,
        };
        // SAFETY: called once from main before any worker exists.
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(GpioError::ConfigFailed(ret));
        }
    }

    let power = gpio_config_t {
        pin_bit_mask: 1u64 << pins::SENSOR_POWER_GPIO,
        mode: gpio_mode_t_GPIO_MODE_OUTPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    // SAFETY: as above.
    let ret = unsafe { gpio_config(&power) };
    if ret != ESP_OK as i32 {
        return Err(GpioError::ConfigFailed(ret));
    }

    info!("gpio: button={} touch={} power={} configured",
        pins::BUTTON_GPIO, pins::SENSOR_TOUCH_GPIO, pins::SENSOR_POWER_GPIO);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_lines() -> Result<(), GpioError> {
    log::info!("gpio(sim): line init skipped");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn read(pin: i32) -> bool {
    // SAFETY: register read on a configured input.
    (unsafe { gpio_get_level(pin) }) != 0
}

#[cfg(not(target_os = "espidf"))]
pub fn read(_pin: i32) -> bool {
    false
}

#[cfg(target_os = "espidf")]
pub fn write(pin: i32, high: bool) {
    // SAFETY: register write on a configured output.
    unsafe { gpio_set_level(pin, u32::from(high)); }
}

#[cfg(not(target_os = "espidf"))]
pub fn write(_pin: i32, _high: bool) {}

/// Active-low input line usable through `embedded_hal::digital::InputPin`.
#[derive(Debug, Clone, Copy)]
pub struct InputLine(pub i32);

impl embedded_hal::digital::ErrorType for InputLine {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::InputPin for InputLine {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(read(self.0))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!read(self.0))
    }
}

// ── GPIO ISR Service ──────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe extern "C" fn button_gpio_isr(_arg: *mut core::ffi::c_void) {
    crate::events::button_edge_from_isr();
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn touch_gpio_isr(_arg: *mut core::ffi::c_void) {
    crate::events::touch_from_isr();
}

/// Install the per-pin ISR service and register the button and touch handlers.
#[cfg(target_os = "espidf")]
pub fn init_isr_service() -> Result<(), GpioError> {
    // SAFETY: gpio_install_isr_service is idempotent; ESP_ERR_INVALID_STATE
    // means it was already installed. Handlers only touch atomics.
    unsafe {
        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK as i32 && ret != ESP_ERR_INVALID_STATE as i32 {
            return Err(GpioError::IsrInstallFailed(ret));
        }

        let ret = gpio_isr_handler_add(pins::BUTTON_GPIO, Some(button_gpio_isr), core::ptr::null_mut());
        if ret != ESP_OK as i32 {
            return Err(GpioError::HandlerAddFailed(ret));
        }
        gpio_intr_enable(pins::BUTTON_GPIO);

        let ret = gpio_isr_handler_add(pins::SENSOR_TOUCH_GPIO, Some(touch_gpio_isr), core::ptr::null_mut());
        if ret != ESP_OK as i32 {
            return Err(GpioError::HandlerAddFailed(ret));
        }
        gpio_intr_enable(pins::SENSOR_TOUCH_GPIO);
    }
    info!("gpio: ISR service installed (button, touch)");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_isr_service() -> Result<(), GpioError> {
    log::info!("gpio(sim): ISR service skipped");
    Ok(())
}

/// Enable or mask one line's interrupt without removing its handler.
#[cfg(target_os = "espidf")]
pub fn set_irq_enabled(pin: i32, enabled: bool) {
    // SAFETY: plain register updates on a line whose handler is registered.
    unsafe {
        if enabled {
            gpio_intr_enable(pin);
        } else {
            gpio_intr_disable(pin);
        }
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn set_irq_enabled(_pin: i32, _enabled: bool) {}

// ── Light sleep ───────────────────────────────────────────────

/// Light-sleep until the touch line is HIGH or the button line is LOW.
/// Returns `true` when the button caused the wake.
#[cfg(target_os = "espidf")]
pub fn light_sleep_on_lines() -> bool {
    // SAFETY: wake configuration is confined to this call; the edge
    // interrupt types are restored before returning.
    unsafe {
        gpio_wakeup_enable(pins::SENSOR_TOUCH_GPIO, gpio_int_type_t_GPIO_INTR_HIGH_LEVEL);
        gpio_wakeup_enable(pins::BUTTON_GPIO, gpio_int_type_t_GPIO_INTR_LOW_LEVEL);
        esp_sleep_enable_gpio_wakeup();

        esp_light_sleep_start();

        gpio_wakeup_disable(pins::SENSOR_TOUCH_GPIO);
        gpio_wakeup_disable(pins::BUTTON_GPIO);
        esp_sleep_disable_wakeup_source(esp_sleep_source_t_ESP_SLEEP_WAKEUP_GPIO);
        gpio_set_intr_type(pins::BUTTON_GPIO, gpio_int_type_t_GPIO_INTR_ANYEDGE);
        gpio_set_intr_type(pins::SENSOR_TOUCH_GPIO, gpio_int_type_t_GPIO_INTR_POSEDGE);
    }
    !read(pins::BUTTON_GPIO)
}
