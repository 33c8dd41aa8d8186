//! Entry point: builds configured marshallers and unmarshallers

use crate::config::{ConfigDefaults, MarshallingConfiguration, Settings};
use crate::error::MarshalResult;
use crate::marshal::{Marshaller, ObjectInput, ObjectOutput, Unmarshaller};
use crate::metadata::ClassInfoRegistry;
use crate::model::Value;
use rivet_io::{ByteArrayInput, SharedByteOutput};
use std::sync::Arc;

/// Creates sessions that share one class metadata registry
///
/// The factory itself is immutable and may be shared between threads; each
/// session it creates belongs to a single thread.
#[derive(Debug, Clone)]
pub struct MarshallerFactory {
    defaults: ConfigDefaults,
    registry: Arc<ClassInfoRegistry>,
}

impl MarshallerFactory {
    /// Factory with built-in defaults over `registry`
    pub fn new(registry: Arc<ClassInfoRegistry>) -> Self {
        Self {
            defaults: ConfigDefaults::default(),
            registry,
        }
    }

    /// Replace the defaults applied to unset configuration values
    pub fn with_defaults(mut self, defaults: ConfigDefaults) -> MarshalResult<Self> {
        defaults.validate()?;
        self.defaults = defaults;
        Ok(self)
    }

    /// Defaults in effect
    pub fn defaults(&self) -> &ConfigDefaults {
        &self.defaults
    }

    /// Shared metadata registry
    pub fn registry(&self) -> &Arc<ClassInfoRegistry> {
        &self.registry
    }

    /// A marshaller for `config`; call [`Marshaller::start`] before writing
    pub fn create_marshaller(&self, config: &MarshallingConfiguration) -> MarshalResult<Marshaller> {
        let settings = Settings::resolve(config, &self.defaults, &self.registry)?;
        Ok(Marshaller::new(settings))
    }

    /// An unmarshaller for `config`; call [`Unmarshaller::start`] before reading
    pub fn create_unmarshaller(&self, config: &MarshallingConfiguration) -> MarshalResult<Unmarshaller> {
        let settings = Settings::resolve(config, &self.defaults, &self.registry)?;
        Ok(Unmarshaller::new(settings))
    }

    /// Marshal one value into a fresh byte vector
    pub fn marshal_to_vec(&self, config: &MarshallingConfiguration, value: &Value) -> MarshalResult<Vec<u8>> {
        let sink = SharedByteOutput::new();
        let mut marshaller = self.create_marshaller(config)?;
        marshaller.start(Box::new(sink.clone()))?;
        marshaller.write_object(value)?;
        marshaller.finish()?;
        Ok(sink.take())
    }

    /// Unmarshal one value from `bytes`
    pub fn unmarshal_from_slice(&self, config: &MarshallingConfiguration, bytes: &[u8]) -> MarshalResult<Value> {
        let mut unmarshaller = self.create_unmarshaller(config)?;
        unmarshaller.start(Box::new(ByteArrayInput::new(bytes.to_vec())))?;
        let value = unmarshaller.read_object()?;
        unmarshaller.finish()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarshalError;

    #[test]
    fn test_defaults_validated() {
        let factory = MarshallerFactory::new(Arc::new(ClassInfoRegistry::new()));
        let bad = ConfigDefaults {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            factory.clone().with_defaults(bad),
            Err(MarshalError::InvalidConfiguration(_))
        ));
        let factory = factory
            .with_defaults(ConfigDefaults {
                buffer_size: 64,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(factory.defaults().buffer_size, 64);
    }

    #[test]
    fn test_scalar_round_trip() {
        let factory = MarshallerFactory::new(Arc::new(ClassInfoRegistry::new()));
        let config = MarshallingConfiguration::new();
        let bytes = factory.marshal_to_vec(&config, &Value::Int(-7)).unwrap();
        assert_eq!(bytes, vec![1, 0x15, 0xff, 0xff, 0xff, 0xf9]);
        let value = factory.unmarshal_from_slice(&config, &bytes).unwrap();
        assert_eq!(value, Value::Int(-7));
    }

    #[test]
    fn test_sessions_need_start() {
        let factory = MarshallerFactory::new(Arc::new(ClassInfoRegistry::new()));
        let mut marshaller = factory.create_marshaller(&MarshallingConfiguration::new()).unwrap();
        assert!(matches!(
            marshaller.write_object(&Value::Null),
            Err(MarshalError::NotActive)
        ));
        let mut unmarshaller = factory.create_unmarshaller(&MarshallingConfiguration::new()).unwrap();
        assert!(matches!(unmarshaller.read_object(), Err(MarshalError::NotActive)));
    }
}
