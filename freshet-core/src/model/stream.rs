//! Imported and exported stream descriptors.
//!
//! Logical descriptors are interned per Import/Export operator logical name;
//! physical descriptors are minted per reaching port, carrying the channel
//! context and submission-time-evaluated text.

use freshet_types::app::{
    ExportDescription, ExportStreamDescription, ImportDescription, ImportStreamDescription,
    StreamProperty,
};
use freshet_types::ids::TupleTypeIndex;
use freshet_types::physical::{
    PhysicalExportedStreamDescription, PhysicalImportStream, PhysicalImportedStreamDescription,
};

use crate::errors::TransformError;
use crate::intrinsic;

#[derive(Debug, Clone)]
pub struct ImportedStream {
    pub filter: String,
    pub application_scope: String,
    pub transport: String,
    pub encoding: String,
    pub tuple_type_index: TupleTypeIndex,
    pub stream: ImportStreamDescription,
}

impl ImportedStream {
    pub fn new(
        desc: &ImportDescription,
        transport: String,
        encoding: String,
        tuple_type_index: TupleTypeIndex,
    ) -> Self {
        Self {
            filter: desc.filter.clone(),
            application_scope: desc.application_scope.clone(),
            transport,
            encoding,
            tuple_type_index,
            stream: desc.stream.clone(),
        }
    }

    /// Mints the physical descriptor for one Import operator instance.
    /// Subscription text is resolved for the instance's channel context.
    pub fn create_physical(
        &self,
        import_oper_name: String,
        logical_import_oper_name: String,
        max_channels: i64,
        channel_index: i64,
    ) -> Result<PhysicalImportedStreamDescription, TransformError> {
        let in_region = channel_index >= 0;
        let stream = match &self.stream {
            ImportStreamDescription::NameBased {
                application_name,
                stream_name,
            } => PhysicalImportStream::NameBased {
                application_name: application_name.clone(),
                stream_name: stream_name.clone(),
            },
            ImportStreamDescription::PropertyBased { subscription } => {
                let subscription = if in_region {
                    intrinsic::eval_subscription(subscription, channel_index, max_channels)?
                } else {
                    subscription.clone()
                };
                PhysicalImportStream::PropertyBased { subscription }
            }
        };
        let filter = if in_region && intrinsic::mentions_intrinsic(&self.filter) {
            intrinsic::eval_intrinsic(&self.filter, channel_index, max_channels)?
        } else {
            self.filter.clone()
        };
        Ok(PhysicalImportedStreamDescription {
            import_oper_name,
            logical_import_oper_name,
            filter,
            application_scope: self.application_scope.clone(),
            stream,
            max_channels,
            channel_index,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExportedStream {
    pub allow_filter: bool,
    pub transport: String,
    pub encoding: String,
    pub tuple_type_index: TupleTypeIndex,
    pub stream: ExportStreamDescription,
}

impl ExportedStream {
    pub fn new(
        desc: &ExportDescription,
        transport: String,
        encoding: String,
        tuple_type_index: TupleTypeIndex,
    ) -> Self {
        Self {
            allow_filter: desc.allow_filter,
            transport,
            encoding,
            tuple_type_index,
            stream: desc.stream.clone(),
        }
    }

    pub fn create_physical(
        &self,
        export_oper_name: String,
        logical_export_oper_name: String,
        max_channels: i64,
        channel_index: i64,
    ) -> Result<PhysicalExportedStreamDescription, TransformError> {
        let in_region = channel_index >= 0;
        let stream = match &self.stream {
            ExportStreamDescription::NameBased { stream_name } => {
                let stream_name = if in_region {
                    format!("{stream_name}[{channel_index}]")
                } else {
                    stream_name.clone()
                };
                ExportStreamDescription::NameBased { stream_name }
            }
            ExportStreamDescription::PropertyBased { properties } => {
                let mut resolved = Vec::with_capacity(properties.len());
                for property in properties {
                    let mut values = Vec::with_capacity(property.values.len());
                    for value in &property.values {
                        if in_region && intrinsic::mentions_intrinsic(value) {
                            values.push(intrinsic::eval_subscription(
                                value,
                                channel_index,
                                max_channels,
                            )?);
                        } else {
                            values.push(value.clone());
                        }
                    }
                    resolved.push(StreamProperty {
                        name: property.name.clone(),
                        values,
                    });
                }
                ExportStreamDescription::PropertyBased {
                    properties: resolved,
                }
            }
        };
        Ok(PhysicalExportedStreamDescription {
            export_oper_name,
            logical_export_oper_name,
            allow_filter: self.allow_filter,
            stream,
            max_channels,
            channel_index,
        })
    }
}
