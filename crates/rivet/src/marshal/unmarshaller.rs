//! Object-graph reader
//!
//! Mirrors the marshaller: every object whose children are still arriving
//! sits on an explicit frame stack, and each finished child is delivered to
//! the slot its parent reserved for it. Local and stream class layouts are
//! reconciled per hierarchy level before any field is read.

use crate::cache::{CacheMiss, Handle, ReferenceCache};
use crate::config::Settings;
use crate::diagnostics::ErrorContext;
use crate::error::{MarshalError, MarshalResult};
use crate::marshal::block::{read_block_length, BlockState};
use crate::marshal::{cast, serializable_levels, Level, ObjectInput};
use crate::metadata::Instantiation;
use crate::model::{ArrayData, Class, ClassKind, FieldType, FromValue, ObjectRef, PrimitiveKind, Value};
use crate::protocol::*;
use rivet_filter::{Candidate, FilterInfo, FilterStatus};
use rivet_io::{ByteInput, DataInput, StreamError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Elements allocated up front for arrays; longer arrays grow as they arrive
const PREALLOCATION_LIMIT: usize = 4096;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DescriptorKind {
    Primitive,
    String,
    Array,
    Plain,
    Enum,
    Serializable,
    Externalizable,
    Externalizer,
}

#[derive(Debug, Clone)]
struct StreamField {
    name: String,
    field_type: FieldType,
    unshared: bool,
}

/// A class as the stream describes it, already resolved locally
#[derive(Debug)]
pub(crate) struct ClassDescriptor {
    class: Class,
    kind: DescriptorKind,
    fields: Vec<StreamField>,
    has_write_hook: bool,
    superclass: Option<Arc<ClassDescriptor>>,
}

impl ClassDescriptor {
    fn simple(class: Class, kind: DescriptorKind) -> Self {
        Self {
            class,
            kind,
            fields: Vec::new(),
            has_write_hook: false,
            superclass: None,
        }
    }
}

/// Serializable class body whose superclass is still being read
struct Body {
    class: Class,
    fields: Vec<StreamField>,
    has_write_hook: bool,
}

enum Link {
    Body(Body, Handle),
    Array(u8),
}

/// One stream level, paired with the local level it feeds if any
#[derive(Clone)]
struct StreamLevel {
    desc: Arc<ClassDescriptor>,
    local: Option<Level>,
    /// Local slot per stream field; `None` discards the value
    slots: Arc<[Option<usize>]>,
}

#[derive(Clone)]
enum LevelPlan {
    Stream(StreamLevel),
    /// Local level the stream has no data for
    NoData(Level),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Enter,
    Fields(usize),
}

/// Where a finished value goes
#[derive(Clone)]
enum Target {
    Root,
    Field {
        object: ObjectRef,
        level: usize,
        slot: usize,
    },
    Element {
        array: ObjectRef,
        index: usize,
    },
    Discard,
    /// The frame only filled fields of an existing object
    Fields,
}

struct ReadContext {
    object: ObjectRef,
    level: StreamLevel,
    /// The level's data is framed as blocks
    framed: bool,
    defaulted: bool,
}

enum ReadFrame {
    Instance {
        object: ObjectRef,
        plan: Vec<LevelPlan>,
        level: usize,
        phase: Phase,
        fields_only: bool,
        handle: Option<Handle>,
        target: Target,
    },
    Elements {
        array: ObjectRef,
        len: usize,
        next: usize,
        handle: Handle,
        target: Target,
    },
}

impl ReadFrame {
    fn context(&self) -> ErrorContext {
        match self {
            ReadFrame::Instance {
                object,
                plan,
                level,
                phase,
                ..
            } => {
                let field = match (plan.get(*level), phase) {
                    (Some(LevelPlan::Stream(stream)), Phase::Fields(i)) => i
                        .checked_sub(1)
                        .and_then(|i| stream.desc.fields.get(i))
                        .map(|f| f.name.clone()),
                    _ => None,
                };
                ErrorContext {
                    class: Some(object.class().name()),
                    field,
                    index: None,
                }
            }
            ReadFrame::Elements { array, next, .. } => ErrorContext {
                class: Some(array.class().name()),
                field: None,
                index: next.checked_sub(1),
            },
        }
    }
}

enum Step {
    Complete,
    NoData(ObjectRef, Level),
    Hook(ObjectRef, StreamLevel),
    Primitive {
        kind: PrimitiveKind,
        store: Option<(ObjectRef, usize, usize)>,
    },
    Object {
        unshared: bool,
        target: Target,
    },
    SkipCustom,
}

enum Started {
    Ready(Value),
    Pushed,
}

/// Reads object graphs from a byte source
pub struct Unmarshaller {
    settings: Settings,
    input: DataInput,
    classes: ReferenceCache<Arc<ClassDescriptor>>,
    instances: ReferenceCache<Value>,
    stack: Vec<ReadFrame>,
    /// One entry per running hook; `None` for external readers
    hooks: Vec<Option<ReadContext>>,
    block: BlockState,
    /// Tag read ahead while looking for block data
    pending_tag: Option<u8>,
    references: i64,
    version: u8,
    active: bool,
}

impl Unmarshaller {
    pub(crate) fn new(settings: Settings) -> Self {
        Self {
            input: DataInput::new(settings.buffer_size),
            classes: ReferenceCache::with_capacity(settings.class_count),
            instances: ReferenceCache::with_capacity(settings.instance_count),
            stack: Vec::new(),
            hooks: Vec::new(),
            block: BlockState::default(),
            pending_tag: None,
            references: 0,
            version: settings.version,
            active: false,
            settings,
        }
    }

    /// Begin a session on `source`: verify the header, then read the
    /// protocol version byte
    pub fn start(&mut self, source: Box<dyn ByteInput>) -> MarshalResult<()> {
        self.reset();
        self.input.start(source);
        if let Some(header) = self.settings.stream_header.clone() {
            header.read_header(&mut self.input)?;
        }
        let version = self.input.read_u8()?;
        if version == 0 || version > MAX_VERSION {
            return Err(MarshalError::corrupt(format!(
                "unsupported protocol version {version}"
            )));
        }
        self.version = version;
        self.active = true;
        log::debug!("unmarshaller started, protocol version {}", version);
        Ok(())
    }

    /// End the session and release the source
    pub fn finish(&mut self) -> MarshalResult<()> {
        self.ensure_active()?;
        self.active = false;
        log::debug!(
            "unmarshaller finished after {} bytes, {} references",
            self.input.bytes_consumed(),
            self.references
        );
        self.reset();
        self.input.finish()?;
        Ok(())
    }

    /// End the session and close the source
    pub fn close(&mut self) -> MarshalResult<()> {
        self.active = false;
        self.reset();
        if self.input.is_active() {
            self.input.close()?;
        }
        Ok(())
    }

    /// Whether a session is running
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Protocol version announced by the stream
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Bytes consumed in this session, header included
    pub fn bytes_consumed(&self) -> u64 {
        self.input.bytes_consumed()
    }

    /// Read an object and convert it to `T`
    pub fn read_object_as<T: FromValue>(&mut self) -> MarshalResult<T> {
        let value = self.read_object()?;
        cast(value)
    }

    /// Forget every object read so far
    pub fn clear_instance_cache(&mut self) -> MarshalResult<()> {
        self.ensure_idle()?;
        self.instances.clear();
        Ok(())
    }

    /// Forget every class and object read so far
    pub fn clear_class_cache(&mut self) -> MarshalResult<()> {
        self.ensure_idle()?;
        self.instances.clear();
        self.classes.clear();
        Ok(())
    }

    fn reset(&mut self) {
        self.classes.clear();
        self.instances.clear();
        self.stack.clear();
        self.hooks.clear();
        self.block = BlockState::default();
        self.pending_tag = None;
        self.references = 0;
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
                "caches cannot be cleared while an object is being read".to_string(),
            ));
        }
        Ok(())
    }

    fn next_tag(&mut self) -> MarshalResult<u8> {
        match self.pending_tag.take() {
            Some(tag) => Ok(tag),
            None => Ok(self.input.read_u8()?),
        }
    }

    // ===== Admission =====

    fn check_filter(&self, candidate: Option<Candidate<'_>>, array_length: i64) -> MarshalResult<()> {
        let Some(setting) = &self.settings.filter else {
            return Ok(());
        };
        let info = FilterInfo::new(
            candidate,
            array_length,
            self.stack.len() as i64 + 1,
            self.references,
            self.input.bytes_consumed() as i64,
        );
        let subject = match candidate {
            Some(candidate) => candidate.to_string(),
            None => format!("reference #{}", self.references),
        };
        // the undecided policy judges classes; a class-less check only enforces ceilings
        let classless = candidate.is_none();
        match catch_unwind(AssertUnwindSafe(|| setting.filter.check_input(&info))) {
            Ok(Ok(FilterStatus::Undecided)) if classless => Ok(()),
            Ok(Ok(status)) if setting.policy.admits(status) => Ok(()),
            Ok(Ok(status)) => {
                log::debug!("filter rejected {}: {:?}", subject, status);
                Err(MarshalError::FilterRejection {
                    subject,
                    reason: format!("{status:?}"),
                })
            }
            Ok(Err(fault)) => {
                log::warn!("filter failed while checking {}: {}", subject, fault);
                Err(MarshalError::FilterRejection {
                    subject,
                    reason: fault.to_string(),
                })
            }
            Err(_) => {
                log::warn!("filter panicked while checking {}", subject);
                Err(MarshalError::FilterRejection {
                    subject,
                    reason: "filter panicked".to_string(),
                })
            }
        }
    }

    // ===== Primitive input =====

    fn read_raw(&mut self, buf: &mut [u8]) -> MarshalResult<()> {
        self.ensure_active()?;
        if !self.block.active {
            return Ok(self.input.read_fully(buf)?);
        }
        let mut filled = 0;
        while filled < buf.len() {
            if self.block.remaining == 0 {
                self.next_block()?;
                continue;
            }
            let n = self.block.remaining.min(buf.len() - filled);
            self.input.read_fully(&mut buf[filled..filled + n])?;
            self.block.remaining -= n;
            filled += n;
        }
        Ok(())
    }

    fn next_block(&mut self) -> MarshalResult<()> {
        if self.block.ended {
            return Err(MarshalError::EndOfStream);
        }
        let tag = self.next_tag()?;
        if let Some(len) = read_block_length(tag, &mut self.input)? {
            self.block.remaining = len;
            return Ok(());
        }
        if tag == ID_END_BLOCK_DATA {
            self.block.ended = true;
            return Err(MarshalError::EndOfStream);
        }
        self.pending_tag = Some(tag);
        Err(MarshalError::corrupt(format!(
            "{} where primitive data was expected",
            tag_name(tag)
        )))
    }

    /// Skip the rest of a hook's data, objects included, through its end
    /// marker
    fn skip_custom_data(&mut self) -> MarshalResult<()> {
        loop {
            if self.block.remaining > 0 {
                self.input.skip_fully(self.block.remaining as u64)?;
                self.block.remaining = 0;
            }
            if self.block.ended {
                return Ok(());
            }
            let tag = self.next_tag()?;
            if let Some(len) = read_block_length(tag, &mut self.input)? {
                self.block.remaining = len;
                continue;
            }
            if tag == ID_END_BLOCK_DATA {
                self.block.ended = true;
                return Ok(());
            }
            self.pending_tag = Some(tag);
            self.read_root(false)?;
        }
    }

    fn read_primitive(&mut self, kind: PrimitiveKind) -> MarshalResult<Value> {
        Ok(match kind {
            PrimitiveKind::Boolean => Value::Boolean(self.read_bool()?),
            PrimitiveKind::Byte => Value::Byte(self.read_i8()?),
            PrimitiveKind::Char => Value::Char(self.read_char()?),
            PrimitiveKind::Short => Value::Short(self.read_i16()?),
            PrimitiveKind::Int => Value::Int(self.read_i32()?),
            PrimitiveKind::Long => Value::Long(self.read_i64()?),
            PrimitiveKind::Float => Value::Float(self.read_f32()?),
            PrimitiveKind::Double => Value::Double(self.read_f64()?),
        })
    }

    // ===== Object input =====

    fn read_root(&mut self, unshared: bool) -> MarshalResult<Value> {
        self.ensure_active()?;
        if self.block.active {
            self.enter_object_from_block()?;
        }
        let saved_block = self.block;
        self.block = BlockState::default();
        let base = self.stack.len();
        let hook_base = self.hooks.len();

        let result = self.read_root_inner(unshared, base);
        if let Err(error) = &result {
            self.unwind(error, base);
            self.hooks.truncate(hook_base);
        }
        self.block = saved_block;
        result
    }

    fn read_root_inner(&mut self, unshared: bool, base: usize) -> MarshalResult<Value> {
        match self.begin_read(unshared, Target::Root)? {
            Started::Ready(value) => Ok(value),
            Started::Pushed => self
                .drive(base)?
                .ok_or_else(|| MarshalError::corrupt("object graph ended without a value")),
        }
    }

    /// Inside a hook an object must start at a block boundary
    fn enter_object_from_block(&mut self) -> MarshalResult<()> {
        if self.block.remaining > 0 {
            return Err(MarshalError::corrupt(format!(
                "object read with {} bytes of primitive data pending",
                self.block.remaining
            )));
        }
        if self.block.ended {
            return Err(MarshalError::EndOfStream);
        }
        let tag = self.next_tag()?;
        if tag == ID_END_BLOCK_DATA {
            self.block.ended = true;
            return Err(MarshalError::EndOfStream);
        }
        if let Some(len) = read_block_length(tag, &mut self.input)? {
            self.block.remaining = len;
            return Err(MarshalError::corrupt(
                "primitive data where an object was expected",
            ));
        }
        self.pending_tag = Some(tag);
        Ok(())
    }

    fn unwind(&mut self, error: &MarshalError, base: usize) {
        if let Some(listener) = self.settings.exception_listener.clone() {
            if self.stack.len() > base {
                for frame in self.stack[base..].iter().rev() {
                    listener.unmarshalling_error(error, &frame.context());
                }
            } else {
                listener.unmarshalling_error(error, &ErrorContext::default());
            }
        }
        self.stack.truncate(base);
    }

    fn drive(&mut self, base: usize) -> MarshalResult<Option<Value>> {
        while self.stack.len() > base {
            match self.next_step() {
                Step::Complete => {
                    let Some(frame) = self.stack.pop() else {
                        break;
                    };
                    if let Some(value) = self.complete(frame)? {
                        return Ok(Some(value));
                    }
                }
                Step::NoData(object, local) => {
                    if let Some(hook) = local.info.read_no_data_hook().cloned() {
                        hook(&object)?;
                    }
                }
                Step::Hook(object, stream) => self.run_read_hook(object, stream)?,
                Step::Primitive { kind, store } => {
                    let value = self.read_primitive(kind)?;
                    if let Some((object, level, slot)) = store {
                        object.set_level_value(level, slot, value);
                    }
                }
                Step::Object { unshared, target } => {
                    if let Started::Ready(value) = self.begin_read(unshared, target.clone())? {
                        self.deliver(target, value)?;
                    }
                }
                Step::SkipCustom => {
                    let saved = self.block;
                    self.block = BlockState::framed();
                    let result = self.skip_custom_data();
                    self.block = saved;
                    result?;
                }
            }
        }
        Ok(None)
    }

    fn next_step(&mut self) -> Step {
        let Some(frame) = self.stack.last_mut() else {
            return Step::Complete;
        };
        match frame {
            ReadFrame::Instance {
                object,
                plan,
                level,
                phase,
                fields_only,
                ..
            } => loop {
                let Some(current) = plan.get(*level) else {
                    return Step::Complete;
                };
                let stream = match current {
                    LevelPlan::NoData(local) => {
                        let local = local.clone();
                        *level += 1;
                        return Step::NoData(object.clone(), local);
                    }
                    LevelPlan::Stream(stream) => stream,
                };
                match *phase {
                    Phase::Enter => {
                        let hooked = !*fields_only
                            && stream
                                .local
                                .as_ref()
                                .map_or(false, |l| l.info.has_custom_read_hook());
                        if hooked {
                            let stream = stream.clone();
                            *level += 1;
                            return Step::Hook(object.clone(), stream);
                        }
                        *phase = Phase::Fields(0);
                    }
                    Phase::Fields(i) => {
                        if let Some(field) = stream.desc.fields.get(i) {
                            *phase = Phase::Fields(i + 1);
                            let store = match (&stream.local, stream.slots.get(i).copied().flatten()) {
                                (Some(local), Some(slot)) => Some((local.index, slot)),
                                _ => None,
                            };
                            return match field.field_type {
                                FieldType::Primitive(kind) => Step::Primitive {
                                    kind,
                                    store: store.map(|(l, s)| (object.clone(), l, s)),
                                },
                                FieldType::Object => Step::Object {
                                    unshared: field.unshared,
                                    target: match store {
                                        Some((level, slot)) => Target::Field {
                                            object: object.clone(),
                                            level,
                                            slot,
                                        },
                                        None => Target::Discard,
                                    },
                                },
                            };
                        }
                        let skip = !*fields_only && stream.desc.has_write_hook;
                        *level += 1;
                        *phase = Phase::Enter;
                        if skip {
                            return Step::SkipCustom;
                        }
                    }
                }
            },
            ReadFrame::Elements {
                array, len, next, ..
            } => {
                if *next < *len {
                    let index = *next;
                    *next += 1;
                    Step::Object {
                        unshared: false,
                        target: Target::Element {
                            array: array.clone(),
                            index,
                        },
                    }
                } else {
                    Step::Complete
                }
            }
        }
    }

    fn complete(&mut self, frame: ReadFrame) -> MarshalResult<Option<Value>> {
        let (value, handle, target, class_hook) = match frame {
            ReadFrame::Instance {
                object,
                handle,
                target,
                ..
            } => (Value::Object(object), handle, target, true),
            ReadFrame::Elements {
                array,
                handle,
                target,
                ..
            } => (Value::Object(array), Some(handle), target, false),
        };
        if let Target::Fields = target {
            return Ok(None);
        }
        let value = self.finish_object(value, handle, class_hook)?;
        self.deliver(target, value)
    }

    fn deliver(&mut self, target: Target, value: Value) -> MarshalResult<Option<Value>> {
        match target {
            Target::Root => Ok(Some(value)),
            Target::Field {
                object,
                level,
                slot,
            } => {
                object.set_level_value(level, slot, value);
                Ok(None)
            }
            Target::Element { array, index } => {
                array.array_extend_to(index + 1);
                array.array_set(index, value)?;
                Ok(None)
            }
            Target::Discard | Target::Fields => Ok(None),
        }
    }

    /// Apply read-time resolution and publish the result under `handle`
    fn finish_object(&mut self, value: Value, handle: Option<Handle>, class_hook: bool) -> MarshalResult<Value> {
        let mut value = value;
        if class_hook {
            if let Value::Object(object) = &value {
                if matches!(
                    object.class().kind(),
                    Some(ClassKind::Serializable | ClassKind::Externalizable)
                ) {
                    let info = self.settings.registry.lookup(object.class())?;
                    if let Some(hook) = info.read_resolve_hook() {
                        value = hook(object)?;
                    }
                }
            }
        }
        if let Some(resolver) = &self.settings.object_resolver {
            if value.as_object().is_some() {
                value = resolver.read_resolve(value)?;
            }
        }
        if let Some(resolver) = &self.settings.object_pre_resolver {
            if value.as_object().is_some() {
                value = resolver.read_resolve(value)?;
            }
        }
        if let Some(handle) = handle {
            self.instances.replace(handle, value.clone());
        }
        Ok(value)
    }

    fn new_handle(&mut self, unshared: bool) -> Handle {
        if unshared {
            self.instances.reserve_unshared()
        } else {
            self.instances.reserve()
        }
    }

    fn begin_read(&mut self, unshared: bool, target: Target) -> MarshalResult<Started> {
        let mut tag = self.next_tag()?;
        while matches!(tag, ID_CLEAR_INSTANCE_CACHE | ID_CLEAR_CLASS_CACHE) {
            if !self.stack.is_empty() || !self.hooks.is_empty() {
                return Err(MarshalError::corrupt("cache clear inside an object graph"));
            }
            self.instances.clear();
            if tag == ID_CLEAR_CLASS_CACHE {
                self.classes.clear();
            }
            log::debug!("peer cleared caches ({})", tag_name(tag));
            tag = self.input.read_u8()?;
        }

        let mut unshared = unshared;
        if tag == ID_UNSHARED {
            unshared = true;
            tag = self.input.read_u8()?;
        }
        let value = match tag {
            ID_NULL => Value::Null,
            ID_BOOLEAN_FALSE => Value::Boolean(false),
            ID_BOOLEAN_TRUE => Value::Boolean(true),
            ID_BYTE => Value::Byte(self.input.read_i8()?),
            ID_SHORT => Value::Short(self.input.read_i16()?),
            ID_CHAR => Value::Char(self.input.read_u16()?),
            ID_INT => Value::Int(self.input.read_i32()?),
            ID_LONG => Value::Long(self.input.read_i64()?),
            ID_FLOAT => Value::Float(self.input.read_f32()?),
            ID_DOUBLE => Value::Double(self.input.read_f64()?),
            ID_REPEAT_OBJECT_NEAR | ID_REPEAT_OBJECT_NEARISH | ID_REPEAT_OBJECT_FAR => {
                self.read_back_reference(tag, unshared)?
            }
            ID_PREDEFINED_OBJECT => {
                let table = self
                    .settings
                    .object_table
                    .clone()
                    .ok_or_else(|| MarshalError::corrupt("predefined object without an object table"))?;
                table.read_object(self)?
            }
            ID_STRING_EMPTY..=ID_STRING_LARGE => self.read_string(tag, unshared)?,
            ID_ARRAY_EMPTY..=ID_ARRAY_LARGE => return self.read_array(tag, unshared, target),
            ID_NEW_OBJECT => return self.read_new_object(unshared, target),
            other => {
                return Err(MarshalError::corrupt(format!(
                    "unexpected {} at an object position",
                    tag_name(other)
                )))
            }
        };
        Ok(Started::Ready(value))
    }

    fn read_back_reference(&mut self, tag: u8, unshared: bool) -> MarshalResult<Value> {
        if unshared {
            return Err(MarshalError::corrupt("back reference read as unshared"));
        }
        let next = self.instances.next_handle();
        let handle = match tag {
            ID_REPEAT_OBJECT_NEAR => next.checked_sub(self.input.read_u8()? as Handle),
            ID_REPEAT_OBJECT_NEARISH => next.checked_sub(self.input.read_u16()? as Handle),
            _ => Some(self.input.read_i32()? as Handle),
        }
        .ok_or_else(|| MarshalError::corrupt("back reference before the first object"))?;
        self.references += 1;
        self.check_filter(None, -1)?;
        match self.instances.lookup(handle) {
            Ok(value) => Ok(value.clone()),
            Err(CacheMiss::NotFound) => Err(MarshalError::corrupt(format!(
                "back reference to unknown handle {handle}"
            ))),
            Err(CacheMiss::Pending) => Err(MarshalError::corrupt(format!(
                "back reference to handle {handle} while it is being created"
            ))),
            Err(CacheMiss::Unshared) => Err(MarshalError::corrupt(format!(
                "back reference to unshared handle {handle}"
            ))),
        }
    }

    fn read_length(&mut self, tag: u8, empty: u8) -> MarshalResult<usize> {
        let len = match tag - empty {
            0 => 0,
            1 => self.input.read_u8()? as usize,
            2 => self.input.read_u16()? as usize,
            _ => {
                let len = self.input.read_i32()?;
                if len < 0 {
                    return Err(MarshalError::corrupt(format!("negative length {len}")));
                }
                len as usize
            }
        };
        Ok(len)
    }

    fn read_string(&mut self, tag: u8, unshared: bool) -> MarshalResult<Value> {
        let units = self.read_length(tag, ID_STRING_EMPTY)?;
        self.references += 1;
        self.check_filter(None, -1)?;
        let text = self.input.read_utf_units(units)?;
        let handle = self.new_handle(unshared);
        self.finish_object(Value::string(text), Some(handle), false)
    }

    fn read_array(&mut self, tag: u8, unshared: bool, target: Target) -> MarshalResult<Started> {
        let len = self.read_length(tag, ID_ARRAY_EMPTY)?;
        let component = self.read_class_descriptor()?.class.clone();
        self.references += 1;
        let array_class = Class::array_of(component.clone());
        self.check_filter(Some(array_class.candidate()), len as i64)?;
        let handle = self.new_handle(unshared);

        if let Class::Primitive(kind) = component {
            let data = read_primitive_array(&mut self.input, kind, len)?;
            let array = Value::Object(ObjectRef::array(component, data)?);
            self.instances.fill(handle, array.clone());
            return Ok(Started::Ready(self.finish_object(array, Some(handle), false)?));
        }
        // grown element by element past the cap, so a forged length costs nothing up front
        let array = ObjectRef::object_array(component, vec![Value::Null; len.min(PREALLOCATION_LIMIT)])?;
        self.instances.fill(handle, Value::Object(array.clone()));
        if len == 0 {
            let value = self.finish_object(Value::Object(array), Some(handle), false)?;
            return Ok(Started::Ready(value));
        }
        self.stack.push(ReadFrame::Elements {
            array,
            len,
            next: 0,
            handle,
            target,
        });
        Ok(Started::Pushed)
    }

    fn read_new_object(&mut self, unshared: bool, target: Target) -> MarshalResult<Started> {
        let desc = self.read_class_descriptor()?;
        let class = desc.class.clone();
        self.references += 1;
        self.check_filter(Some(class.candidate()), -1)?;
        let value = match desc.kind {
            DescriptorKind::Serializable => return self.read_serializable(&desc, unshared, target),
            DescriptorKind::Enum => self.read_enum(&class, unshared)?,
            DescriptorKind::Externalizable => self.read_externalizable(&class, unshared)?,
            DescriptorKind::Externalizer => self.read_externalized(&class, unshared)?,
            _ => {
                return Err(MarshalError::invalid_class(
                    class.name(),
                    "instances of this class cannot be read",
                ))
            }
        };
        Ok(Started::Ready(value))
    }

    fn read_enum(&mut self, class: &Class, unshared: bool) -> MarshalResult<Value> {
        let handle = self.new_handle(unshared);
        let name = self.input.read_utf()?;
        let constant = class
            .as_defined()
            .and_then(|def| def.enum_constant(&name))
            .ok_or_else(|| {
                MarshalError::invalid_class(class.name(), format!("no enum constant `{name}`"))
            })?;
        let value = Value::Object(constant);
        self.instances.fill(handle, value.clone());
        self.finish_object(value, Some(handle), false)
    }

    fn read_externalizable(&mut self, class: &Class, unshared: bool) -> MarshalResult<Value> {
        let info = self.settings.registry.lookup(class)?;
        let handle = self.new_handle(unshared);
        let object = info.instantiate()?;
        if let Instantiation::StreamConstructor(hook) = info.instantiation().clone() {
            self.run_block_hook(None, BlockState::framed(), |this| hook(&object, this))?;
            self.instances.fill(handle, Value::Object(object.clone()));
        } else {
            let hook = info.read_external_hook().cloned().ok_or_else(|| {
                MarshalError::invalid_class(class.name(), "no external read hook")
            })?;
            self.instances.fill(handle, Value::Object(object.clone()));
            self.run_block_hook(None, BlockState::framed(), |this| hook(&object, this))?;
        }
        self.finish_object(Value::Object(object), Some(handle), true)
    }

    fn read_externalized(&mut self, class: &Class, unshared: bool) -> MarshalResult<Value> {
        let externalizer = self
            .settings
            .externalizer_factory
            .as_ref()
            .and_then(|factory| factory.externalizer_for(class))
            .ok_or_else(|| MarshalError::invalid_class(class.name(), "no externalizer configured"))?;
        let handle = self.new_handle(unshared);
        let (object, _) = self.run_block_hook(None, BlockState::framed(), |this| {
            externalizer.create_external(class, this)
        })?;
        let value = Value::Object(object);
        self.instances.fill(handle, value.clone());
        self.finish_object(value, Some(handle), false)
    }

    fn read_serializable(
        &mut self,
        desc: &Arc<ClassDescriptor>,
        unshared: bool,
        target: Target,
    ) -> MarshalResult<Started> {
        let info = self.settings.registry.lookup(&desc.class)?;
        let plan = self.plan_levels(desc)?;
        let handle = self.new_handle(unshared);
        let object = info.instantiate()?;
        self.instances.fill(handle, Value::Object(object.clone()));
        self.stack.push(ReadFrame::Instance {
            object,
            plan,
            level: 0,
            phase: Phase::Enter,
            fields_only: false,
            handle: Some(handle),
            target,
        });
        Ok(Started::Pushed)
    }

    /// Pair stream levels with local levels, root first
    ///
    /// Stream levels without a local class are read and discarded; local
    /// levels the stream lacks get their no-data hook.
    fn plan_levels(&self, desc: &Arc<ClassDescriptor>) -> MarshalResult<Vec<LevelPlan>> {
        let mut locals = serializable_levels(&self.settings.registry, &desc.class)?;
        locals.reverse();
        let mut start = 0;
        let mut plan = Vec::new();
        let mut current = Some(desc.clone());
        while let Some(stream) = current {
            let matched = stream.class.as_defined().and_then(|def| {
                locals[start..]
                    .iter()
                    .position(|local| local.info.describes(def))
                    .map(|p| p + start)
            });
            let local = match matched {
                Some(m) => {
                    plan.extend(locals[start..m].iter().cloned().map(LevelPlan::NoData));
                    start = m + 1;
                    Some(locals[m].clone())
                }
                None => None,
            };
            current = stream.superclass.clone();
            plan.push(LevelPlan::Stream(stream_level(stream, local)?));
        }
        plan.extend(locals[start..].iter().cloned().map(LevelPlan::NoData));
        plan.reverse();
        Ok(plan)
    }

    /// Run `hook` with primitive reads served from `block`
    fn run_block_hook<R, F>(
        &mut self,
        context: Option<ReadContext>,
        block: BlockState,
        hook: F,
    ) -> MarshalResult<(R, Option<ReadContext>)>
    where
        F: FnOnce(&mut Self) -> MarshalResult<R>,
    {
        let saved = self.block;
        self.hooks.push(context);
        self.block = block;
        let result = hook(self);
        let context = self.hooks.pop().flatten();
        let result = match result {
            Ok(value) if !block.ended => self.skip_custom_data().map(|_| value),
            other => other,
        };
        self.block = saved;
        Ok((result?, context))
    }

    fn run_read_hook(&mut self, object: ObjectRef, stream: StreamLevel) -> MarshalResult<()> {
        let Some(hook) = stream
            .local
            .as_ref()
            .and_then(|local| local.info.read_hook().cloned())
        else {
            return Ok(());
        };
        let framed = stream.desc.has_write_hook;
        let block = if framed {
            BlockState::framed()
        } else {
            BlockState::exhausted()
        };
        let context = ReadContext {
            object: object.clone(),
            level: stream.clone(),
            framed,
            defaulted: false,
        };
        let ((), context) = self.run_block_hook(Some(context), block, |this| hook(&object, this))?;
        if !framed && !context.map_or(false, |c| c.defaulted) {
            self.read_default_fields(object, stream)?;
        }
        Ok(())
    }

    fn read_default_fields(&mut self, object: ObjectRef, stream: StreamLevel) -> MarshalResult<()> {
        let saved = self.block;
        self.block = BlockState::default();
        let base = self.stack.len();
        self.stack.push(ReadFrame::Instance {
            object,
            plan: vec![LevelPlan::Stream(stream)],
            level: 0,
            phase: Phase::Enter,
            fields_only: true,
            handle: None,
            target: Target::Fields,
        });
        let result = self.drive(base).map(|_| ());
        if let Err(error) = &result {
            self.unwind(error, base);
        }
        self.block = saved;
        result
    }

    // ===== Class descriptors =====

    fn read_class_descriptor(&mut self) -> MarshalResult<Arc<ClassDescriptor>> {
        let tag = self.input.read_u8()?;
        self.read_descriptor(tag)
    }

    /// Read a descriptor and its superclass chain
    fn read_descriptor(&mut self, first: u8) -> MarshalResult<Arc<ClassDescriptor>> {
        let mut links = Vec::new();
        let mut tag = first;
        let mut tail = loop {
            match tag {
                ID_SERIALIZABLE_CLASS => {
                    let handle = self.classes.reserve();
                    let body = self.read_serializable_body()?;
                    links.push(Link::Body(body, handle));
                    tag = self.input.read_u8()?;
                    if tag == ID_NO_SUPER {
                        break None;
                    }
                }
                ID_ARRAY_CLASS if links.is_empty() => {
                    let dimensions = self.input.read_u8()?;
                    if dimensions == 0 {
                        return Err(MarshalError::corrupt("array class without dimensions"));
                    }
                    links.push(Link::Array(dimensions));
                    tag = self.input.read_u8()?;
                }
                ID_ARRAY_CLASS | ID_NO_SUPER => {
                    return Err(MarshalError::corrupt(format!(
                        "misplaced {} in a class descriptor",
                        tag_name(tag)
                    )))
                }
                other => break Some(self.read_simple_descriptor(other)?),
            }
        };

        while let Some(link) = links.pop() {
            tail = Some(match link {
                Link::Body(body, handle) => {
                    if let Some(parent) = &tail {
                        if parent.kind != DescriptorKind::Serializable {
                            return Err(MarshalError::corrupt(format!(
                                "{} cannot extend {}",
                                body.class, parent.class
                            )));
                        }
                    }
                    let desc = Arc::new(ClassDescriptor {
                        class: body.class,
                        kind: DescriptorKind::Serializable,
                        fields: body.fields,
                        has_write_hook: body.has_write_hook,
                        superclass: tail.take(),
                    });
                    self.classes.fill(handle, desc.clone());
                    desc
                }
                Link::Array(dimensions) => {
                    let element = tail
                        .take()
                        .ok_or_else(|| MarshalError::corrupt("array class without an element type"))?;
                    Arc::new(ClassDescriptor::simple(
                        Class::array_with_dimensions(element.class.clone(), dimensions),
                        DescriptorKind::Array,
                    ))
                }
            });
        }
        tail.ok_or_else(|| MarshalError::corrupt("empty class descriptor"))
    }

    fn resolve_class(&mut self, wire_name: &str, version: i64) -> MarshalResult<Class> {
        let resolver = self
            .settings
            .class_resolver
            .clone()
            .ok_or_else(|| MarshalError::ClassResolution {
                name: wire_name.to_string(),
                cause: Some("no class resolver configured".into()),
            })?;
        let name = resolver.inbound_name(wire_name);
        self.check_filter(Some(Candidate::named(&name)), -1)?;
        let class = resolver.resolve_class(self, &name, version)?;
        log::trace!("resolved {} as {}", wire_name, class);
        Ok(class)
    }

    fn read_serializable_body(&mut self) -> MarshalResult<Body> {
        let wire_name = self.input.read_utf()?;
        let version = self.input.read_i64()?;
        let class = self.resolve_class(&wire_name, version)?;
        let flags = self.input.read_u8()?;
        let count = self.input.read_u16()? as usize;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let code = self.input.read_u8()?;
            let field_type = FieldType::from_type_code(code)
                .ok_or_else(|| MarshalError::corrupt(format!("unknown field type code {code:#04x}")))?;
            let name = self.input.read_utf()?;
            let unshared = self.input.read_bool()?;
            fields.push(StreamField {
                name,
                field_type,
                unshared,
            });
        }

        if class.kind() != Some(ClassKind::Serializable) {
            return Err(MarshalError::invalid_class(
                class.name(),
                "stream describes it as serializable",
            ));
        }
        let info = self.settings.registry.lookup(&class)?;
        if info.version() != version {
            return Err(MarshalError::invalid_class(
                class.name(),
                format!(
                    "stream version {version} does not match local version {}",
                    info.version()
                ),
            ));
        }
        Ok(Body {
            class,
            fields,
            has_write_hook: flags & SC_WRITE_HOOK != 0,
        })
    }

    fn read_simple_descriptor(&mut self, tag: u8) -> MarshalResult<Arc<ClassDescriptor>> {
        let (class, kind, handle) = match tag {
            ID_REPEAT_CLASS => {
                let handle = self.input.read_i32()? as Handle;
                return self
                    .classes
                    .lookup(handle)
                    .map(Arc::clone)
                    .map_err(|_| MarshalError::corrupt(format!("unknown class handle {handle}")));
            }
            ID_PREDEFINED_CLASS => {
                let table = self
                    .settings
                    .class_table
                    .clone()
                    .ok_or_else(|| MarshalError::corrupt("predefined class without a class table"))?;
                let class = table.read_class(self)?;
                return self.local_descriptor(class);
            }
            ID_STRING_CLASS => (Class::String, DescriptorKind::String, None),
            ID_PLAIN_CLASS | ID_ENUM_TYPE_CLASS | ID_EXTERNALIZER_CLASS => {
                let handle = self.classes.reserve();
                let wire_name = self.input.read_utf()?;
                let class = self.resolve_class(&wire_name, 0)?;
                let kind = match tag {
                    ID_PLAIN_CLASS => DescriptorKind::Plain,
                    ID_ENUM_TYPE_CLASS => DescriptorKind::Enum,
                    _ => DescriptorKind::Externalizer,
                };
                if kind == DescriptorKind::Enum && class.kind() != Some(ClassKind::Enum) {
                    return Err(MarshalError::invalid_class(class.name(), "stream describes it as an enum"));
                }
                (class, kind, Some(handle))
            }
            ID_EXTERNALIZABLE_CLASS => {
                let handle = self.classes.reserve();
                let wire_name = self.input.read_utf()?;
                let version = self.input.read_i64()?;
                let class = self.resolve_class(&wire_name, version)?;
                if class.kind() != Some(ClassKind::Externalizable) {
                    return Err(MarshalError::invalid_class(
                        class.name(),
                        "stream describes it as externalizable",
                    ));
                }
                let local = self.settings.registry.lookup(&class)?.version();
                if local != version {
                    return Err(MarshalError::invalid_class(
                        class.name(),
                        format!("stream version {version} does not match local version {local}"),
                    ));
                }
                (class, DescriptorKind::Externalizable, Some(handle))
            }
            other => match other
                .checked_sub(ID_PRIM_CLASS_BASE)
                .and_then(PrimitiveKind::from_ordinal)
            {
                Some(kind) => (Class::Primitive(kind), DescriptorKind::Primitive, None),
                None => {
                    return Err(MarshalError::corrupt(format!(
                        "unexpected {} in a class descriptor",
                        tag_name(other)
                    )))
                }
            },
        };
        let desc = Arc::new(ClassDescriptor::simple(class, kind));
        if let Some(handle) = handle {
            self.classes.fill(handle, desc.clone());
        }
        Ok(desc)
    }

    /// Descriptor for a class the peer named through the class table
    fn local_descriptor(&self, class: Class) -> MarshalResult<Arc<ClassDescriptor>> {
        let kind = match &class {
            Class::Primitive(_) => DescriptorKind::Primitive,
            Class::String => DescriptorKind::String,
            Class::Array { .. } => DescriptorKind::Array,
            Class::Defined(def) => match def.kind() {
                ClassKind::Plain => DescriptorKind::Plain,
                ClassKind::Enum => DescriptorKind::Enum,
                ClassKind::Externalizable => DescriptorKind::Externalizable,
                ClassKind::Serializable => {
                    let mut tail = None;
                    for level in serializable_levels(&self.settings.registry, &class)? {
                        let info = level.info;
                        let fields = info
                            .fields()
                            .iter()
                            .map(|f| StreamField {
                                name: f.name.clone(),
                                field_type: f.field_type,
                                unshared: f.unshared,
                            })
                            .collect();
                        tail = Some(Arc::new(ClassDescriptor {
                            class: info.class()?,
                            kind: DescriptorKind::Serializable,
                            fields,
                            has_write_hook: info.has_custom_write_hook(),
                            superclass: tail.take(),
                        }));
                    }
                    return tail.ok_or_else(|| MarshalError::invalid_class(class.name(), "no serializable level"));
                }
            },
        };
        Ok(Arc::new(ClassDescriptor::simple(class, kind)))
    }
}

/// Map stream fields onto the local level, checking types agree
fn stream_level(desc: Arc<ClassDescriptor>, local: Option<Level>) -> MarshalResult<StreamLevel> {
    let slots = match &local {
        Some(level) => desc
            .fields
            .iter()
            .map(|field| {
                let Some(local_field) = level.info.fields().iter().find(|f| f.name == field.name) else {
                    return Ok(None);
                };
                if local_field.field_type != field.field_type {
                    return Err(MarshalError::invalid_class(
                        level.info.name(),
                        format!(
                            "field `{}` is {} locally but {} in the stream",
                            field.name,
                            local_field.field_type.name(),
                            field.field_type.name()
                        ),
                    ));
                }
                Ok(local_field.slot)
            })
            .collect::<MarshalResult<Vec<_>>>()?,
        None => vec![None; desc.fields.len()],
    };
    Ok(StreamLevel {
        desc,
        local,
        slots: slots.into(),
    })
}

fn read_elements<T>(
    input: &mut DataInput,
    len: usize,
    mut read: impl FnMut(&mut DataInput) -> Result<T, StreamError>,
) -> Result<Vec<T>, StreamError> {
    let mut values = Vec::with_capacity(len.min(PREALLOCATION_LIMIT));
    for _ in 0..len {
        values.push(read(input)?);
    }
    Ok(values)
}

fn read_primitive_array(input: &mut DataInput, kind: PrimitiveKind, len: usize) -> Result<ArrayData, StreamError> {
    Ok(match kind {
        PrimitiveKind::Boolean => ArrayData::Boolean(read_elements(input, len, DataInput::read_bool)?),
        PrimitiveKind::Byte => {
            let mut bytes = Vec::with_capacity(len.min(PREALLOCATION_LIMIT));
            let mut chunk = [0u8; 4096];
            while bytes.len() < len {
                let n = chunk.len().min(len - bytes.len());
                input.read_fully(&mut chunk[..n])?;
                bytes.extend(chunk[..n].iter().map(|b| *b as i8));
            }
            ArrayData::Byte(bytes)
        }
        PrimitiveKind::Char => ArrayData::Char(read_elements(input, len, DataInput::read_u16)?),
        PrimitiveKind::Short => ArrayData::Short(read_elements(input, len, DataInput::read_i16)?),
        PrimitiveKind::Int => ArrayData::Int(read_elements(input, len, DataInput::read_i32)?),
        PrimitiveKind::Long => ArrayData::Long(read_elements(input, len, DataInput::read_i64)?),
        PrimitiveKind::Float => ArrayData::Float(read_elements(input, len, DataInput::read_f32)?),
        PrimitiveKind::Double => ArrayData::Double(read_elements(input, len, DataInput::read_f64)?),
    })
}

impl ObjectInput for Unmarshaller {
    fn read_bool(&mut self) -> MarshalResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u8(&mut self) -> MarshalResult<u8> {
        let mut buf = [0u8; 1];
        self.read_raw(&mut buf)?;
        Ok(buf[0])
    }

    fn read_i8(&mut self) -> MarshalResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_i16(&mut self) -> MarshalResult<i16> {
        let mut buf = [0u8; 2];
        self.read_raw(&mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }

    fn read_char(&mut self) -> MarshalResult<u16> {
        let mut buf = [0u8; 2];
        self.read_raw(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_i32(&mut self) -> MarshalResult<i32> {
        let mut buf = [0u8; 4];
        self.read_raw(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    fn read_i64(&mut self) -> MarshalResult<i64> {
        let mut buf = [0u8; 8];
        self.read_raw(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    fn read_f32(&mut self) -> MarshalResult<f32> {
        Ok(f32::from_bits(self.read_i32()? as u32))
    }

    fn read_f64(&mut self) -> MarshalResult<f64> {
        Ok(f64::from_bits(self.read_i64()? as u64))
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> MarshalResult<()> {
        self.read_raw(buf)
    }

    fn read_utf(&mut self) -> MarshalResult<String> {
        let len = self.read_char()? as usize;
        let mut bytes = vec![0u8; len];
        self.read_raw(&mut bytes)?;
        Ok(rivet_io::utf::decode(&bytes)?)
    }

    fn read_object(&mut self) -> MarshalResult<Value> {
        self.read_root(false)
    }

    fn read_object_unshared(&mut self) -> MarshalResult<Value> {
        self.read_root(true)
    }

    fn default_read_object(&mut self) -> MarshalResult<()> {
        self.ensure_active()?;
        let remaining = self.block.remaining;
        let ended = self.block.ended;
        let (object, stream) = match self.hooks.last_mut() {
            Some(Some(context)) => {
                if context.defaulted {
                    return Err(MarshalError::Hook(
                        "default_read_object called twice".to_string(),
                    ));
                }
                if context.framed && remaining > 0 {
                    return Err(MarshalError::Hook(
                        "default_read_object called with primitive data pending".to_string(),
                    ));
                }
                if context.framed && ended {
                    return Err(MarshalError::EndOfStream);
                }
                context.defaulted = true;
                (context.object.clone(), context.level.clone())
            }
            _ => {
                return Err(MarshalError::Hook(
                    "default_read_object called outside a read hook".to_string(),
                ))
            }
        };
        self.read_default_fields(object, stream)
    }
}

impl std::fmt::Debug for Unmarshaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unmarshaller")
            .field("active", &self.active)
            .field("version", &self.version)
            .field("classes", &self.classes.len())
            .field("instances", &self.instances.len())
            .field("references", &self.references)
            .finish()
    }
}
