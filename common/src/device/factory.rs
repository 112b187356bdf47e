use tracing::debug;

use crate::{
    config::ThermostatConfig,
    controller::{CycleGuard, Strategy},
    device::{
        CoolerFanDevice, HeatPumpDevice, HeaterAuxDevice, HeaterCoolerDevice, HvacDevice,
        MultiHvacDevice, SwitchDevice,
    },
    entity::EntityId,
    error::ConfigError,
};

/// Assembles the device tree described by `config`.
pub fn build_device(config: &ThermostatConfig) -> Result<HvacDevice, ConfigError> {
    config.validate()?;

    let guard = CycleGuard {
        min_cycle_duration: config.min_cycle_duration(),
    };
    let switch = |strategy, entities: &[EntityId]| {
        HvacDevice::Switch(SwitchDevice::new(strategy, entities.to_vec(), guard))
    };
    let has_fan = !config.fan.is_empty();
    let mut fan_used = false;

    let root = if config.heat_pump_cooling.is_some() {
        debug!("building heat pump");
        HvacDevice::HeatPump(HeatPumpDevice::new(
            config.heater.clone(),
            guard,
            config.heat_cool_requested(),
        ))
    } else if config.fan_mode {
        debug!("building fan");
        switch(Strategy::Fan, &config.heater)
    } else if config.ac_mode {
        if has_fan {
            debug!("building cooler with fan");
            fan_used = true;
            cooler_fan(config, &config.heater, guard)
        } else {
            debug!("building cooler");
            switch(Strategy::Cooling, &config.heater)
        }
    } else if !config.cooler.is_empty() || config.heat_cool_requested() {
        if config.cooler.is_empty() {
            return Err(ConfigError::MissingCooler);
        }
        debug!("building heater and cooler");
        let heater = heater_branch(config, guard)?;
        let cooler = if has_fan && config.fan_hot_tolerance.is_some() {
            fan_used = true;
            cooler_fan(config, &config.cooler, guard)
        } else {
            switch(Strategy::Cooling, &config.cooler)
        };
        HvacDevice::HeaterCooler(HeaterCoolerDevice::new(
            heater,
            cooler,
            config.heat_cool_mode.unwrap_or(true),
        ))
    } else {
        debug!("building heater");
        heater_branch(config, guard)?
    };

    let mut children = vec![root];
    if has_fan && !fan_used {
        children.push(switch(Strategy::Fan, &config.fan));
    }
    if !config.dryer.is_empty() {
        children.push(switch(Strategy::Drying, &config.dryer));
    }

    Ok(if children.len() == 1 {
        children.remove(0)
    } else {
        debug!(count = children.len(), "combining devices");
        HvacDevice::Multi(MultiHvacDevice::new(children))
    })
}

fn heater_branch(config: &ThermostatConfig, guard: CycleGuard) -> Result<HvacDevice, ConfigError> {
    if config.aux_heater.is_empty() {
        return Ok(HvacDevice::Switch(SwitchDevice::new(
            Strategy::Heating,
            config.heater.clone(),
            guard,
        )));
    }
    let timeout = config
        .aux_heater_timeout()
        .ok_or(ConfigError::MissingAuxTimeout)?;
    Ok(HvacDevice::HeaterAux(HeaterAuxDevice::new(
        config.heater.clone(),
        config.aux_heater.clone(),
        timeout,
        config.aux_heater_dual_mode,
        config.tz()?,
        guard,
    )))
}

fn cooler_fan(
    config: &ThermostatConfig,
    cooler: &[EntityId],
    guard: CycleGuard,
) -> HvacDevice {
    HvacDevice::CoolerFan(CoolerFanDevice::new(
        SwitchDevice::new(Strategy::Cooling, cooler.to_vec(), guard),
        SwitchDevice::new(Strategy::Fan, config.fan.clone(), guard),
        config.fan_on_with_ac,
    ))
}
