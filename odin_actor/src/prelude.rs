/*
 * Copyright (c) 2024, United States Government, as represented by the
 * Administrator of the National Aeronautics and Space Administration.
 * All rights reserved.
 *
 * The ODIN - Open Data Integration Framework is licensed under the
 * Apache License, Version 2.0 (the "License"); you may not use this file
 * except in compliance with the License. You may obtain a copy of the
 * License at http://www.apache.org/licenses/LICENSE-2.0.
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

pub use crate::{
    ActorSystem, ActorSystemHandle, Actor, ActorHandle, PreActorHandle, AbortHandle, JoinHandle,
    sleep, timeout, yield_now, spawn, spawn_blocking, block_on, block_on_send_msg, block_on_timeout_send_msg, // from respective cfg module
    Query, QueryBuilder, query, query_ref, timeout_query, timeout_query_ref, RequestProcessor,
    MpscSender, MpscReceiver, create_mpsc_sender_receiver, send, recv,
    ActorReceiver, ReceiveAction, MsgReceiver, DynMsgReceiver, TryMsgReceiver, SysMsgReceiver, SysMsg, DefaultReceiveAction, FromSysMsg, 
    Identifiable, MsgAction, MsgSubscriptions, MsgSubscriber, DynDataAction, DynDataActionList, SyncDynDataAction, AsyncDynDataAction,
    _Start_, _Ping_, _Timer_, _Exec_, _Pause_, _Resume_, _Terminate_,
    OdinActorError,
    secs,millis,micros,nanos,minutes,hours,
    DEFAULT_CHANNEL_BOUNDS,
    define_actor_msg_set, match_actor_msg, cont, stop, term, impl_actor, spawn_actor, spawn_pre_actor, spawn_dyn_actor,
    DataAction, DataRefAction, LabeledDataAction, LabeledDataRefAction, 
    NoDataAction, NoDataRefAction, NoLabeledDataAction, NoLabeledDataRefAction,
    data_action, dataref_action, labeled_data_action, labeled_dataref_action,
    msg_subscriber,sync_dyn_data_action,async_dyn_data_action,send_msg_dyn_action,try_send_msg_dyn_action,
    trace,debug,info,warn,error
};

