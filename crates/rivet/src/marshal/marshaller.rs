//! Object-graph writer
//!
//! Traversal runs on an explicit stack of frames, one per object whose
//! children are still being written. Only user hooks re-enter the writer:
//! a hook that writes an object starts a nested drive over the same stack,
//! bounded below by the frames that were live when it was called.

use crate::cache::{Handle, Identity, SessionCaches};
use crate::config::Settings;
use crate::diagnostics::ErrorContext;
use crate::error::{MarshalError, MarshalResult};
use crate::externalizer::Externalizer;
use crate::marshal::block::BlockWriter;
use crate::marshal::{serializable_levels, Level, ObjectOutput};
use crate::model::{ArrayData, Class, ClassKind, FieldType, ObjectData, ObjectRef, Value};
use crate::protocol::*;
use rivet_io::{ByteOutput, DataOutput, StreamError};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Class cache key; a class written for an externalizer gets its own
/// descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ClassKey {
    Described(Class),
    Externalized(Class),
}

impl ClassKey {
    fn class(&self) -> &Class {
        match self {
            ClassKey::Described(class) | ClassKey::Externalized(class) => class,
        }
    }
}

impl Identity for ClassKey {
    type Key = ClassKey;

    fn identity_key(&self) -> ClassKey {
        self.clone()
    }
}

struct HookContext {
    object: ObjectRef,
    level: Level,
}

enum WriteFrame {
    Instance {
        object: ObjectRef,
        levels: Vec<Level>,
        level: usize,
        field: usize,
        /// Set for `default_write_object`, which runs inside the level's hook
        fields_only: bool,
    },
    Elements {
        array: ObjectRef,
        next: usize,
    },
}

impl WriteFrame {
    fn context(&self) -> ErrorContext {
        match self {
            WriteFrame::Instance {
                object,
                levels,
                level,
                field,
                ..
            } => {
                let field = field
                    .checked_sub(1)
                    .and_then(|f| levels.get(*level)?.info.fields().get(f))
                    .map(|f| f.name.clone());
                ErrorContext {
                    class: Some(object.class().name()),
                    field,
                    index: None,
                }
            }
            WriteFrame::Elements { array, next } => ErrorContext {
                class: Some(array.class().name()),
                field: None,
                index: next.checked_sub(1),
            },
        }
    }
}

enum Step {
    Done,
    Hook(ObjectRef, Level),
    Primitive(Value),
    Object(Value, bool),
}

/// Writes object graphs to a byte sink
pub struct Marshaller {
    settings: Settings,
    out: DataOutput,
    caches: SessionCaches<ClassKey, ObjectRef>,
    /// Substitutions already made, keyed by the original's identity
    replacements: FxHashMap<usize, (ObjectRef, Value)>,
    stack: Vec<WriteFrame>,
    /// One entry per running hook; `None` for external writers
    hooks: Vec<Option<HookContext>>,
    block: BlockWriter,
    pending_clear: Option<u8>,
    active: bool,
}

impl Marshaller {
    pub(crate) fn new(settings: Settings) -> Self {
        let caches = SessionCaches::new(settings.class_count, settings.instance_count);
        Self {
            out: DataOutput::new(settings.buffer_size),
            settings,
            caches,
            replacements: FxHashMap::default(),
            stack: Vec::new(),
            hooks: Vec::new(),
            block: BlockWriter::default(),
            pending_clear: None,
            active: false,
        }
    }

    /// Begin a session on `sink`: header, then the protocol version byte
    pub fn start(&mut self, sink: Box<dyn ByteOutput>) -> MarshalResult<()> {
        self.reset();
        self.out.start(sink);
        if let Some(header) = self.settings.stream_header.clone() {
            header.write_header(&mut self.out)?;
        }
        self.out.write_u8(self.settings.version)?;
        self.active = true;
        log::debug!("marshaller started, protocol version {}", self.settings.version);
        Ok(())
    }

    /// End the session, flushing everything and releasing the sink
    pub fn finish(&mut self) -> MarshalResult<()> {
        self.ensure_active()?;
        self.active = false;
        let written = self.out.bytes_written();
        self.reset();
        self.out.finish()?;
        log::debug!("marshaller finished after {} bytes", written);
        Ok(())
    }

    /// End the session and close the sink
    pub fn close(&mut self) -> MarshalResult<()> {
        self.active = false;
        self.reset();
        if self.out.is_active() {
            self.out.close()?;
        }
        Ok(())
    }

    /// Whether a session is running
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Bytes written in this session, header included
    pub fn bytes_written(&self) -> u64 {
        self.out.bytes_written()
    }

    /// Forget every written instance; the peer forgets in lock-step
    pub fn clear_instance_cache(&mut self) -> MarshalResult<()> {
        self.ensure_idle()?;
        self.caches.clear_instances();
        self.replacements.clear();
        self.pending_clear.get_or_insert(ID_CLEAR_INSTANCE_CACHE);
        log::debug!("instance cache cleared");
        Ok(())
    }

    /// Forget every written class and instance; the peer forgets in lock-step
    pub fn clear_class_cache(&mut self) -> MarshalResult<()> {
        self.ensure_idle()?;
        self.caches.clear_all();
        self.replacements.clear();
        self.pending_clear = Some(ID_CLEAR_CLASS_CACHE);
        log::debug!("class and instance caches cleared");
        Ok(())
    }

    fn reset(&mut self) {
        self.caches.clear_all();
        self.replacements.clear();
        self.stack.clear();
        self.hooks.clear();
        self.block.reset();
        self.pending_clear = None;
    }

    fn ensure_active(&self) -> MarshalResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(MarshalError::NotActive)
        }
    }

    fn ensure_idle(&self) -> MarshalResult<()> {
        self.ensure_active()?;
        if !self.stack.is_empty() || !self.hooks.is_empty() {
            return Err(MarshalError::Hook(
                "caches cannot be cleared while an object is being written".to_string(),
            ));
        }
        Ok(())
    }

    // ===== Primitive output =====

    fn put(&mut self, bytes: &[u8]) -> MarshalResult<()> {
        self.ensure_active()?;
        if self.block.active {
            self.block.push(bytes);
            if self.block.is_full() {
                self.block.flush_to(&mut self.out)?;
            }
        } else {
            self.out.write_bytes(bytes)?;
        }
        Ok(())
    }

    fn tag(&mut self, tag: u8) -> MarshalResult<()> {
        Ok(self.out.write_u8(tag)?)
    }

    fn write_primitive(&mut self, value: &Value) -> MarshalResult<()> {
        match value {
            Value::Boolean(v) => self.write_bool(*v),
            Value::Byte(v) => self.write_i8(*v),
            Value::Char(v) => self.write_char(*v),
            Value::Short(v) => self.write_i16(*v),
            Value::Int(v) => self.write_i32(*v),
            Value::Long(v) => self.write_i64(*v),
            Value::Float(v) => self.write_f32(*v),
            Value::Double(v) => self.write_f64(*v),
            other => Err(MarshalError::TypeMismatch {
                expected: "primitive".to_string(),
                actual: other.type_name(),
            }),
        }
    }

    // ===== Object output =====

    fn write_root(&mut self, value: &Value, unshared: bool) -> MarshalResult<()> {
        self.ensure_active()?;
        let top_level = self.stack.is_empty() && self.hooks.is_empty();
        let saved_block = self.block.active;
        if saved_block {
            self.block.flush_to(&mut self.out)?;
            self.block.active = false;
        }
        let base = self.stack.len();
        let hook_base = self.hooks.len();

        let result = self.write_root_inner(value, unshared, base, top_level);
        if let Err(error) = &result {
            self.unwind(error, base, Some(value));
            self.hooks.truncate(hook_base);
        }
        self.block.active = saved_block;
        result
    }

    fn write_root_inner(
        &mut self,
        value: &Value,
        unshared: bool,
        base: usize,
        top_level: bool,
    ) -> MarshalResult<()> {
        if top_level {
            if let Some(tag) = self.pending_clear.take() {
                self.tag(tag)?;
            }
        }
        self.begin_object(value, unshared)?;
        self.drive(base)
    }

    fn unwind(&mut self, error: &MarshalError, base: usize, root: Option<&Value>) {
        if let Some(listener) = self.settings.exception_listener.clone() {
            if self.stack.len() > base {
                for frame in self.stack[base..].iter().rev() {
                    listener.marshalling_error(error, &frame.context());
                }
            } else if let Some(root) = root {
                let context = ErrorContext {
                    class: Some(root.type_name()),
                    ..Default::default()
                };
                listener.marshalling_error(error, &context);
            }
        }
        self.stack.truncate(base);
    }

    fn drive(&mut self, base: usize) -> MarshalResult<()> {
        while self.stack.len() > base {
            match self.next_step() {
                Step::Done => {
                    self.stack.pop();
                }
                Step::Hook(object, level) => self.run_write_hook(object, level)?,
                Step::Primitive(value) => self.write_primitive(&value)?,
                Step::Object(value, unshared) => self.begin_object(&value, unshared)?,
            }
        }
        Ok(())
    }

    fn next_step(&mut self) -> Step {
        let Some(frame) = self.stack.last_mut() else {
            return Step::Done;
        };
        match frame {
            WriteFrame::Instance {
                object,
                levels,
                level,
                field,
                fields_only,
            } => loop {
                let Some(current) = levels.get(*level) else {
                    return Step::Done;
                };
                if *field == 0 && !*fields_only && current.info.has_custom_write_hook() {
                    let current = current.clone();
                    *level += 1;
                    return Step::Hook(object.clone(), current);
                }
                let Some(serial) = current.info.fields().get(*field) else {
                    *level += 1;
                    *field = 0;
                    continue;
                };
                *field += 1;
                let value = serial
                    .slot
                    .and_then(|slot| object.level_value(current.index, slot))
                    .unwrap_or_else(|| serial.field_type.default_value());
                return match serial.field_type {
                    FieldType::Primitive(_) => Step::Primitive(value),
                    FieldType::Object => Step::Object(value, serial.unshared),
                };
            },
            WriteFrame::Elements { array, next } => match array.array_get(*next) {
                Some(value) => {
                    *next += 1;
                    Step::Object(value, false)
                }
                None => Step::Done,
            },
        }
    }

    /// Run `hook` with primitive output framed as block data
    fn run_block_hook<F>(&mut self, context: Option<HookContext>, hook: F) -> MarshalResult<()>
    where
        F: FnOnce(&mut Self) -> MarshalResult<()>,
    {
        self.hooks.push(context);
        self.block.active = true;
        let result = hook(self);
        self.hooks.pop();
        let flushed = self.block.flush_to(&mut self.out);
        self.block.active = false;
        result?;
        flushed?;
        self.tag(ID_END_BLOCK_DATA)
    }

    fn run_write_hook(&mut self, object: ObjectRef, level: Level) -> MarshalResult<()> {
        let Some(hook) = level.info.write_hook().cloned() else {
            return Ok(());
        };
        let context = HookContext {
            object: object.clone(),
            level,
        };
        self.run_block_hook(Some(context), |this| hook(&object, this))
    }

    fn begin_object(&mut self, value: &Value, unshared: bool) -> MarshalResult<()> {
        let value = match (&self.settings.object_pre_resolver, value) {
            (Some(pre), Value::Object(object)) => pre.write_replace(object)?,
            _ => value.clone(),
        };
        let mut object = match value {
            Value::Object(object) => object,
            other => return self.write_boxed(&other),
        };

        if !unshared {
            if let Some((_, replacement)) = self.replacements.get(&object.identity()) {
                object = match replacement.clone() {
                    Value::Object(object) => object,
                    other => return self.write_boxed(&other),
                };
            }
            if let Some(handle) = self.caches.instances.find(&object) {
                return self.write_back_reference(handle);
            }
        }
        if self.write_predefined(&object)? {
            return Ok(());
        }

        if let Some(substitute) = self.substitute(&object)? {
            if !unshared {
                self.replacements
                    .insert(object.identity(), (object.clone(), substitute.clone()));
            }
            object = match substitute {
                Value::Object(object) => object,
                other => return self.write_boxed(&other),
            };
            if !unshared {
                if let Some(handle) = self.caches.instances.find(&object) {
                    return self.write_back_reference(handle);
                }
            }
            if self.write_predefined(&object)? {
                return Ok(());
            }
        }
        self.write_new(&object, unshared)
    }

    fn write_boxed(&mut self, value: &Value) -> MarshalResult<()> {
        match value {
            Value::Null => self.tag(ID_NULL),
            Value::Boolean(false) => self.tag(ID_BOOLEAN_FALSE),
            Value::Boolean(true) => self.tag(ID_BOOLEAN_TRUE),
            Value::Byte(v) => {
                self.tag(ID_BYTE)?;
                Ok(self.out.write_i8(*v)?)
            }
            Value::Char(v) => {
                self.tag(ID_CHAR)?;
                Ok(self.out.write_u16(*v)?)
            }
            Value::Short(v) => {
                self.tag(ID_SHORT)?;
                Ok(self.out.write_i16(*v)?)
            }
            Value::Int(v) => {
                self.tag(ID_INT)?;
                Ok(self.out.write_i32(*v)?)
            }
            Value::Long(v) => {
                self.tag(ID_LONG)?;
                Ok(self.out.write_i64(*v)?)
            }
            Value::Float(v) => {
                self.tag(ID_FLOAT)?;
                Ok(self.out.write_f32(*v)?)
            }
            Value::Double(v) => {
                self.tag(ID_DOUBLE)?;
                Ok(self.out.write_f64(*v)?)
            }
            Value::Object(object) => Err(MarshalError::Hook(format!(
                "{} reached a scalar position",
                object.class()
            ))),
        }
    }

    fn write_back_reference(&mut self, handle: Handle) -> MarshalResult<()> {
        let distance = self.caches.instances.next_handle() - handle;
        if distance <= 0xFF {
            self.tag(ID_REPEAT_OBJECT_NEAR)?;
            self.out.write_u8(distance as u8)?;
        } else if distance <= 0xFFFF {
            self.tag(ID_REPEAT_OBJECT_NEARISH)?;
            self.out.write_u16(distance as u16)?;
        } else {
            self.tag(ID_REPEAT_OBJECT_FAR)?;
            self.out.write_i32(handle as i32)?;
        }
        Ok(())
    }

    fn write_predefined(&mut self, object: &ObjectRef) -> MarshalResult<bool> {
        let Some(table) = self.settings.object_table.clone() else {
            return Ok(false);
        };
        let Some(writer) = table.writer_for(object) else {
            return Ok(false);
        };
        self.tag(ID_PREDEFINED_OBJECT)?;
        writer.write_object(self, object)?;
        Ok(true)
    }

    /// Class-level then session-level write replacement; `None` if unchanged
    fn substitute(&mut self, object: &ObjectRef) -> MarshalResult<Option<Value>> {
        let mut current = Value::Object(object.clone());
        if matches!(
            object.class().kind(),
            Some(ClassKind::Serializable | ClassKind::Externalizable)
        ) {
            let info = self.settings.registry.lookup(object.class())?;
            if let Some(hook) = info.write_replace_hook() {
                current = hook(object)?;
            }
        }
        if let (Some(resolver), Value::Object(replaced)) = (&self.settings.object_resolver, &current) {
            current = resolver.write_replace(replaced)?;
        }
        let unchanged = matches!(&current, Value::Object(o) if o.ptr_eq(object));
        Ok((!unchanged).then_some(current))
    }

    fn assign_handle(&mut self, object: &ObjectRef, unshared: bool) -> Handle {
        if unshared {
            self.caches.instances.reserve_unshared()
        } else {
            self.caches.instances.internalize(object).0
        }
    }

    fn write_new(&mut self, object: &ObjectRef, unshared: bool) -> MarshalResult<()> {
        let class = object.class().clone();
        let externalizer = match (&class, &self.settings.externalizer_factory) {
            (Class::Defined(_), Some(factory)) => factory.externalizer_for(&class),
            _ => None,
        };
        if let Some(externalizer) = externalizer {
            if unshared {
                self.tag(ID_UNSHARED)?;
            }
            return self.write_externalized(object, class, externalizer, unshared);
        }

        let kind = class.kind();
        if !self.settings.checker.is_serializable(&class)
            || class.is_primitive()
            || kind == Some(ClassKind::Plain)
        {
            return Err(MarshalError::NotSerializable(class.name()));
        }
        if unshared {
            self.tag(ID_UNSHARED)?;
        }
        match kind {
            None if class == Class::String => self.write_string(object, unshared),
            None => self.write_array(object, &class, unshared),
            Some(ClassKind::Enum) => self.write_enum(object, &class, unshared),
            Some(ClassKind::Externalizable) => self.write_externalizable(object, class, unshared),
            Some(_) => self.write_serializable(object, &class, unshared),
        }
    }

    fn write_string(&mut self, object: &ObjectRef, unshared: bool) -> MarshalResult<()> {
        let text = object.as_string().unwrap_or_default();
        let units = rivet_io::utf::utf16_len(&text);
        if units == 0 {
            self.tag(ID_STRING_EMPTY)?;
        } else if units <= 0xFF {
            self.tag(ID_STRING_SMALL)?;
            self.out.write_u8(units as u8)?;
        } else if units <= 0xFFFF {
            self.tag(ID_STRING_MEDIUM)?;
            self.out.write_u16(units as u16)?;
        } else {
            self.tag(ID_STRING_LARGE)?;
            self.out.write_i32(units as i32)?;
        }
        self.out.write_utf_unprefixed(&text)?;
        self.assign_handle(object, unshared);
        Ok(())
    }

    fn write_array(&mut self, object: &ObjectRef, class: &Class, unshared: bool) -> MarshalResult<()> {
        let component = class
            .component_type()
            .ok_or_else(|| MarshalError::NotSerializable(class.name()))?;
        let len = object.array_len().unwrap_or(0);
        if len == 0 {
            self.tag(ID_ARRAY_EMPTY)?;
        } else if len <= 0xFF {
            self.tag(ID_ARRAY_SMALL)?;
            self.out.write_u8(len as u8)?;
        } else if len <= 0xFFFF {
            self.tag(ID_ARRAY_MEDIUM)?;
            self.out.write_u16(len as u16)?;
        } else {
            self.tag(ID_ARRAY_LARGE)?;
            self.out.write_i32(len as i32)?;
        }
        self.write_class_descriptor(&component)?;
        self.assign_handle(object, unshared);

        match &*object.data() {
            ObjectData::Array(ArrayData::Object(_)) => {}
            ObjectData::Array(primitive) => {
                return Ok(write_primitive_elements(&mut self.out, primitive)?);
            }
            _ => return Err(MarshalError::NotSerializable(class.name())),
        }
        if len > 0 {
            self.stack.push(WriteFrame::Elements {
                array: object.clone(),
                next: 0,
            });
        }
        Ok(())
    }

    fn write_enum(&mut self, object: &ObjectRef, class: &Class, unshared: bool) -> MarshalResult<()> {
        let name = object
            .enum_name()
            .ok_or_else(|| MarshalError::invalid_class(class.name(), "enum value without a constant"))?;
        self.tag(ID_NEW_OBJECT)?;
        self.write_class_descriptor(class)?;
        self.assign_handle(object, unshared);
        self.out.write_utf(&name)?;
        Ok(())
    }

    fn write_externalizable(&mut self, object: &ObjectRef, class: Class, unshared: bool) -> MarshalResult<()> {
        let info = self.settings.registry.lookup(&class)?;
        let hook = info
            .write_external_hook()
            .cloned()
            .ok_or_else(|| MarshalError::NotSerializable(class.name()))?;
        self.tag(ID_NEW_OBJECT)?;
        self.write_class_descriptor(&class)?;
        self.assign_handle(object, unshared);
        self.run_block_hook(None, |this| hook(object, this))
    }

    fn write_externalized(
        &mut self,
        object: &ObjectRef,
        class: Class,
        externalizer: Arc<dyn Externalizer>,
        unshared: bool,
    ) -> MarshalResult<()> {
        self.tag(ID_NEW_OBJECT)?;
        self.write_descriptor(ClassKey::Externalized(class))?;
        self.assign_handle(object, unshared);
        self.run_block_hook(None, |this| externalizer.write_external(object, this))
    }

    fn write_serializable(&mut self, object: &ObjectRef, class: &Class, unshared: bool) -> MarshalResult<()> {
        let levels = serializable_levels(&self.settings.registry, class)?;
        self.tag(ID_NEW_OBJECT)?;
        self.write_class_descriptor(class)?;
        self.assign_handle(object, unshared);
        self.stack.push(WriteFrame::Instance {
            object: object.clone(),
            levels,
            level: 0,
            field: 0,
            fields_only: false,
        });
        Ok(())
    }

    // ===== Class descriptors =====

    fn write_class_descriptor(&mut self, class: &Class) -> MarshalResult<()> {
        self.write_descriptor(ClassKey::Described(class.clone()))
    }

    fn outbound_name(&self, class: &Class) -> String {
        match &self.settings.class_resolver {
            Some(resolver) => resolver.outbound_name(class),
            None => class.name(),
        }
    }

    fn annotate(&mut self, class: &Class) -> MarshalResult<()> {
        match self.settings.class_resolver.clone() {
            Some(resolver) => resolver.annotate_class(self, class),
            None => Ok(()),
        }
    }

    /// Write a descriptor, following serializable superclasses until one is
    /// already known to the peer or the chain ends
    fn write_descriptor(&mut self, key: ClassKey) -> MarshalResult<()> {
        let mut next = Some(key);
        while let Some(key) = next.take() {
            let class = key.class().clone();
            if let ClassKey::Described(_) = key {
                if let Some(table) = self.settings.class_table.clone() {
                    if let Some(writer) = table.writer_for(&class) {
                        self.tag(ID_PREDEFINED_CLASS)?;
                        writer.write_class(self, &class)?;
                        break;
                    }
                }
            }
            if let Some(handle) = self.caches.classes.find(&key) {
                self.tag(ID_REPEAT_CLASS)?;
                self.out.write_i32(handle as i32)?;
                break;
            }

            let def = match &class {
                Class::Primitive(kind) => {
                    self.tag(ID_PRIM_CLASS_BASE + kind.ordinal())?;
                    break;
                }
                Class::String => {
                    self.tag(ID_STRING_CLASS)?;
                    break;
                }
                Class::Array {
                    element,
                    dimensions,
                } => {
                    self.tag(ID_ARRAY_CLASS)?;
                    self.out.write_u8(*dimensions)?;
                    next = Some(ClassKey::Described((**element).clone()));
                    continue;
                }
                Class::Defined(def) => def.clone(),
            };

            self.caches.classes.internalize(&key);
            let name = self.outbound_name(&class);
            log::trace!("writing descriptor for {} as {}", class, name);
            if let ClassKey::Externalized(_) = key {
                self.tag(ID_EXTERNALIZER_CLASS)?;
                self.out.write_utf(&name)?;
                self.annotate(&class)?;
                break;
            }
            match def.kind() {
                ClassKind::Plain => {
                    self.tag(ID_PLAIN_CLASS)?;
                    self.out.write_utf(&name)?;
                    self.annotate(&class)?;
                }
                ClassKind::Enum => {
                    self.tag(ID_ENUM_TYPE_CLASS)?;
                    self.out.write_utf(&name)?;
                    self.annotate(&class)?;
                }
                ClassKind::Externalizable => {
                    let info = self.settings.registry.lookup(&class)?;
                    self.tag(ID_EXTERNALIZABLE_CLASS)?;
                    self.out.write_utf(&name)?;
                    self.out.write_i64(info.version())?;
                    self.annotate(&class)?;
                }
                ClassKind::Serializable => {
                    let info = self.settings.registry.lookup(&class)?;
                    self.tag(ID_SERIALIZABLE_CLASS)?;
                    self.out.write_utf(&name)?;
                    self.out.write_i64(info.version())?;
                    self.annotate(&class)?;
                    let flags = if info.has_custom_write_hook() {
                        SC_WRITE_HOOK
                    } else {
                        0
                    };
                    self.out.write_u8(flags)?;
                    let fields = info.fields();
                    self.out.write_u16(fields.len() as u16)?;
                    for field in fields {
                        self.out.write_u8(field.field_type.type_code())?;
                        self.out.write_utf(&field.name)?;
                        self.out.write_bool(field.unshared)?;
                    }
                    match def.superclass() {
                        Some(parent) if parent.kind() == Some(ClassKind::Serializable) => {
                            next = Some(ClassKey::Described(parent.clone()));
                        }
                        _ => self.tag(ID_NO_SUPER)?,
                    }
                }
            }
        }
        Ok(())
    }
}

fn write_primitive_elements(out: &mut DataOutput, data: &ArrayData) -> Result<(), StreamError> {
    match data {
        ArrayData::Boolean(v) => v.iter().try_for_each(|x| out.write_bool(*x)),
        ArrayData::Byte(v) => {
            let bytes: Vec<u8> = v.iter().map(|x| *x as u8).collect();
            out.write_bytes(&bytes)
        }
        ArrayData::Char(v) => v.iter().try_for_each(|x| out.write_u16(*x)),
        ArrayData::Short(v) => v.iter().try_for_each(|x| out.write_i16(*x)),
        ArrayData::Int(v) => v.iter().try_for_each(|x| out.write_i32(*x)),
        ArrayData::Long(v) => v.iter().try_for_each(|x| out.write_i64(*x)),
        ArrayData::Float(v) => v.iter().try_for_each(|x| out.write_f32(*x)),
        ArrayData::Double(v) => v.iter().try_for_each(|x| out.write_f64(*x)),
        ArrayData::Object(_) => Ok(()),
    }
}

impl ObjectOutput for Marshaller {
    fn write_bool(&mut self, value: bool) -> MarshalResult<()> {
        self.put(&[value as u8])
    }

    fn write_u8(&mut self, value: u8) -> MarshalResult<()> {
        self.put(&[value])
    }

    fn write_i8(&mut self, value: i8) -> MarshalResult<()> {
        self.put(&value.to_be_bytes())
    }

    fn write_i16(&mut self, value: i16) -> MarshalResult<()> {
        self.put(&value.to_be_bytes())
    }

    fn write_char(&mut self, value: u16) -> MarshalResult<()> {
        self.put(&value.to_be_bytes())
    }

    fn write_i32(&mut self, value: i32) -> MarshalResult<()> {
        self.put(&value.to_be_bytes())
    }

    fn write_i64(&mut self, value: i64) -> MarshalResult<()> {
        self.put(&value.to_be_bytes())
    }

    fn write_f32(&mut self, value: f32) -> MarshalResult<()> {
        self.put(&value.to_be_bytes())
    }

    fn write_f64(&mut self, value: f64) -> MarshalResult<()> {
        self.put(&value.to_be_bytes())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> MarshalResult<()> {
        self.put(bytes)
    }

    fn write_utf(&mut self, value: &str) -> MarshalResult<()> {
        let encoded = rivet_io::utf::encode(value);
        if encoded.len() > rivet_io::utf::MAX_PREFIXED_LEN {
            return Err(StreamError::UtfTooLong(encoded.len()).into());
        }
        self.put(&(encoded.len() as u16).to_be_bytes())?;
        self.put(&encoded)
    }

    fn write_object(&mut self, value: &Value) -> MarshalResult<()> {
        self.write_root(value, false)
    }

    fn write_object_unshared(&mut self, value: &Value) -> MarshalResult<()> {
        self.write_root(value, true)
    }

    fn default_write_object(&mut self) -> MarshalResult<()> {
        self.ensure_active()?;
        let Some(Some(context)) = self.hooks.last() else {
            return Err(MarshalError::Hook(
                "default_write_object called outside a write hook".to_string(),
            ));
        };
        let frame = WriteFrame::Instance {
            object: context.object.clone(),
            levels: vec![context.level.clone()],
            level: 0,
            field: 0,
            fields_only: true,
        };
        self.block.flush_to(&mut self.out)?;
        let saved_block = self.block.active;
        self.block.active = false;
        let base = self.stack.len();
        self.stack.push(frame);
        let result = self.drive(base);
        if let Err(error) = &result {
            self.unwind(error, base, None);
        }
        self.block.active = saved_block;
        result
    }

    fn flush(&mut self) -> MarshalResult<()> {
        self.ensure_active()?;
        self.block.flush_to(&mut self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marshaller")
            .field("active", &self.active)
            .field("version", &self.settings.version)
            .field("classes", &self.caches.classes.len())
            .field("instances", &self.caches.instances.len())
            .finish()
    }
}
